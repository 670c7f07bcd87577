//! Indexer error types.

use crate::chain::ChainError;
use crate::events::cursor::CursorError;
use crate::store::StoreError;
use crate::types::MarketId;

/// Errors raised by an indexer cycle.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Chain client failure.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Store failure before commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A log references a user or outcome the database does not know.
    #[error("market {market_id}: missing {entity} referenced by tx {tx_hash}")]
    MissingReference {
        /// Market being indexed.
        market_id: MarketId,
        /// Description of the missing entity.
        entity: String,
        /// Transaction that referenced it.
        tx_hash: String,
    },

    /// Logs or derived state are inconsistent with the chain.
    #[error("market {market_id}: data integrity violated: {reason}")]
    Integrity {
        /// Market being indexed.
        market_id: MarketId,
        /// What was violated.
        reason: String,
    },

    /// The market has no cursor row.
    #[error("market {0}: no chain cursor")]
    MissingCursor(MarketId),

    /// The cursor would skip or replay blocks.
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// The commit itself failed.
    #[error("commit failed: {0}")]
    Commit(StoreError),

    /// A cycle failed and rolling it back failed too.
    #[error("rollback failed after {original}: {rollback}")]
    DoubleFault {
        /// Error that triggered the rollback.
        original: Box<IndexerError>,
        /// Rollback failure.
        rollback: StoreError,
    },
}

impl IndexerError {
    /// Returns true for failures that clear on a later cycle without
    /// operator action. These are logged, never paged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Chain(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Creates an integrity error.
    #[must_use]
    pub fn integrity(market_id: MarketId, reason: impl Into<String>) -> Self {
        Self::Integrity {
            market_id,
            reason: reason.into(),
        }
    }

    /// Returns a short label for logs and audit context.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Chain(e) if e.is_transient() => "transient",
            Self::MissingReference { .. }
            | Self::Integrity { .. }
            | Self::Cursor(_)
            | Self::MissingCursor(_)
            | Self::Chain(_) => "data_integrity",
            Self::Store(_) | Self::Commit(_) | Self::DoubleFault { .. } => "infrastructure",
        }
    }
}
