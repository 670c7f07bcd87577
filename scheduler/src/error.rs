//! Scheduler errors.

use marketsync_indexer::StoreError;

/// Errors of the job lock manager and the fan-out workers.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error from the market store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A job row could not be mapped.
    #[error("invalid job row: {0}")]
    Decode(String),

    /// A job row that must exist was not found.
    #[error("job {0} not found")]
    NotFound(String),

    /// Failure injected by the in-memory job store.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl JobError {
    /// Returns true if retrying on the next tick may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(err) | Self::Store(StoreError::Database(err)) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            Self::Injected(_) => true,
            _ => false,
        }
    }
}
