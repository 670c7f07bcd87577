//! Persistence layer.
//!
//! The indexer works against two traits:
//!
//! - [`IndexStore`] opens transactions ([`IndexTx`]) in which one cycle
//!   locks its cursor, resolves references, inserts derived rows and
//!   advances the cursor. Nothing is visible until [`IndexTx::commit`].
//! - [`PricingStore`] serves the fan-out workers: claiming queued work
//!   items and writing recomputed chances.
//!
//! [`PgStore`] implements both on Postgres; [`MemoryStore`] implements both
//! in memory with the same transactional semantics.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::events::cursor::ChainCursor;
use crate::events::types::DerivedRecord;
use crate::types::{MarketId, MarketTarget, Outcome, UserId, WorkItem, WorkKind};

pub use memory::{MemoryState, MemoryStore};
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row with the same key already exists.
    #[error("duplicate row: {0}")]
    Duplicate(String),

    /// A row that must exist was not found.
    #[error("row not found: {0}")]
    NotFound(String),

    /// A row could not be mapped to a domain type.
    #[error("invalid row: {0}")]
    Decode(String),

    /// Failure injected by the in-memory store.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Wraps a database error, mapping unique-key violations to
    /// [`StoreError::Duplicate`].
    #[must_use]
    pub fn from_insert(err: sqlx::Error, key: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate(key.into()),
            _ => Self::Database(err),
        }
    }
}

/// Transactional access used by one indexer cycle.
#[async_trait]
pub trait IndexTx: Send {
    /// Loads and row-locks the market's cursor.
    async fn lock_cursor(&mut self, market_id: MarketId) -> Result<Option<ChainCursor>, StoreError>;

    /// Resolves a wallet address to a user.
    async fn find_user_by_wallet(&mut self, wallet: &str) -> Result<Option<UserId>, StoreError>;

    /// Loads and row-locks one outcome of a market.
    async fn find_outcome(
        &mut self,
        market_id: MarketId,
        index: u32,
    ) -> Result<Option<Outcome>, StoreError>;

    /// Writes a new pool balance for an outcome.
    async fn set_pool_balance(
        &mut self,
        market_id: MarketId,
        index: u32,
        pool_balance: Decimal,
    ) -> Result<(), StoreError>;

    /// Inserts one derived row.
    ///
    /// Fails with [`StoreError::Duplicate`] if a row for the same
    /// `(market_id, tx_hash, log_index)` exists.
    async fn insert_record(&mut self, record: &DerivedRecord) -> Result<(), StoreError>;

    /// Enqueues follow-up work. Returns false if an identical item is
    /// already pending.
    async fn enqueue_work(&mut self, kind: WorkKind, market_id: MarketId) -> Result<bool, StoreError>;

    /// Moves the cursor forward to `to`.
    async fn advance_cursor(&mut self, market_id: MarketId, to: u64) -> Result<(), StoreError>;

    /// Commits every change made through this transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards every change made through this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Store used by the indexer and the supervisor.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Markets that should have a running indexer: status `ACTIVE` or
    /// `FUNDING` with an enabled cursor and a contract address.
    async fn desired_markets(&self) -> Result<Vec<MarketTarget>, StoreError>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn IndexTx>, StoreError>;
}

/// Store used by fan-out workers.
#[async_trait]
pub trait PricingStore: Send + Sync {
    /// Claims up to `limit` pending items of a kind, marking them running.
    ///
    /// Rows claimed by a concurrent worker are skipped, not waited on.
    async fn claim_work(&self, kind: WorkKind, limit: usize) -> Result<Vec<WorkItem>, StoreError>;

    /// Marks a claimed item done.
    async fn complete_work(&self, id: i64) -> Result<(), StoreError>;

    /// Returns a claimed item to pending.
    async fn release_work(&self, id: i64) -> Result<(), StoreError>;

    /// Outcomes of a market ordered by index.
    async fn outcomes(&self, market_id: MarketId) -> Result<Vec<Outcome>, StoreError>;

    /// Writes recomputed chances, `(outcome_index, chance)`, atomically.
    async fn update_chances(
        &self,
        market_id: MarketId,
        chances: &[(u32, Decimal)],
    ) -> Result<(), StoreError>;
}

/// Converts a block number to the signed column type.
pub(crate) fn block_to_db(block: u64) -> Result<i64, StoreError> {
    i64::try_from(block).map_err(|_| StoreError::Decode(format!("block {block} exceeds BIGINT")))
}

/// Converts a signed column back to a block number.
pub(crate) fn block_from_db(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Decode(format!("negative block {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_conversion() {
        assert_eq!(block_to_db(150).expect("fits"), 150);
        assert!(block_to_db(u64::MAX).is_err());
        assert_eq!(block_from_db(150).expect("positive"), 150);
        assert!(block_from_db(-1).is_err());
    }

    #[test]
    fn test_from_insert_keeps_other_errors() {
        let err = StoreError::from_insert(sqlx::Error::RowNotFound, "k");
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
