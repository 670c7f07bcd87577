//! Chain client error types.

/// Chain client errors.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The RPC call timed out.
    #[error("rpc request timed out")]
    Timeout,

    /// The HTTP transport failed.
    #[error("rpc transport failed: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error.
    #[error("rpc error [{code}]: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// A log or response could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Logs were not in strict chain order.
    #[error("log ordering violated: {0}")]
    Ordering(String),

    /// Invalid client configuration.
    #[error("invalid chain configuration: {0}")]
    InvalidConfig(String),
}

impl ChainError {
    /// Returns true for failures that a later retry can clear.
    ///
    /// Only timeouts, transport failures and the codes a node returns while
    /// overloaded or not yet synced to the requested block qualify. Other RPC errors (invalid params,
    /// result limits), decoding and ordering failures are deterministic for
    /// a finalized range and never clear on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Rpc { code, .. } => is_transient_rpc_code(*code),
            Self::Decode(_) | Self::Ordering(_) | Self::InvalidConfig(_) => false,
        }
    }
}

/// Generic server error ("header not found"), resource unavailable, and
/// rate limiting.
const fn is_transient_rpc_code(code: i64) -> bool {
    matches!(code, -32000 | -32002 | 429)
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
