//! Job row persistence.
//!
//! Every lock transition runs in its own short transaction that reads the
//! job row with a row lock, so concurrent acquirers serialize on the row.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::JobError;
use crate::job::{JobKey, JobRecord};

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// One job-row transaction.
#[async_trait]
pub trait JobTx: Send {
    /// Loads and row-locks a job.
    async fn lock_job(&mut self, key: &JobKey) -> Result<Option<JobRecord>, JobError>;

    /// Writes the lock fields of a job locked in this transaction.
    async fn save_job(&mut self, job: &JobRecord) -> Result<(), JobError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), JobError>;

    /// Discards the transaction.
    async fn rollback(self: Box<Self>) -> Result<(), JobError>;
}

/// Opens job-row transactions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn JobTx>, JobError>;
}
