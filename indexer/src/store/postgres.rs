//! Postgres store.
//!
//! Runtime-checked `sqlx` queries against the market schema. Each indexer
//! cycle runs inside one [`sqlx::Transaction`]; the cursor and every outcome
//! it touches are read with `FOR UPDATE`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};

use super::{block_from_db, block_to_db, IndexStore, IndexTx, PricingStore, StoreError};
use crate::events::cursor::{ChainCursor, CursorStatus};
use crate::events::types::DerivedRecord;
use crate::types::{MarketId, MarketTarget, Outcome, UserId, WorkItem, WorkKind};

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn index_to_db(index: u32) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

fn outcome_from_row(row: &PgRow) -> Result<Outcome, StoreError> {
    let index: i32 = row.try_get("outcome_index")?;
    Ok(Outcome {
        market_id: row.try_get("market_id")?,
        index: u32::try_from(index)
            .map_err(|_| StoreError::Decode(format!("negative outcome index {index}")))?,
        pool_balance: row.try_get("pool_balance")?,
        chance: row.try_get("chance")?,
    })
}

fn cursor_from_row(row: &PgRow) -> Result<ChainCursor, StoreError> {
    let status: String = row.try_get("status")?;
    let window_size: i64 = row.try_get("window_size")?;
    Ok(ChainCursor {
        market_id: row.try_get("market_id")?,
        contract_address: row.try_get("contract_address")?,
        last_processed_block: block_from_db(row.try_get("last_processed_block")?)?,
        window_size: block_from_db(window_size)?,
        status: CursorStatus::from_db(&status),
    })
}

fn work_from_row(row: &PgRow) -> Result<WorkItem, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(WorkItem {
        id: row.try_get("id")?,
        kind: kind
            .parse()
            .map_err(|e| StoreError::Decode(format!("work kind: {e}")))?,
        market_id: row.try_get("market_id")?,
        status: status
            .parse()
            .map_err(|e| StoreError::Decode(format!("work status: {e}")))?,
        enqueued_at: row.try_get("enqueued_at")?,
    })
}

#[async_trait]
impl IndexStore for PgStore {
    async fn desired_markets(&self) -> Result<Vec<MarketTarget>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.id, c.contract_address \
             FROM market m \
             JOIN chain_cursor c ON c.market_id = m.id \
             WHERE m.status IN ('ACTIVE', 'FUNDING') \
               AND c.status = 'ENABLED' \
               AND c.contract_address IS NOT NULL \
               AND c.contract_address <> '' \
             ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MarketTarget {
                    market_id: row.try_get("id")?,
                    contract_address: row.try_get("contract_address")?,
                })
            })
            .collect()
    }

    async fn begin(&self) -> Result<Box<dyn IndexTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// One indexer-cycle transaction.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl IndexTx for PgTx {
    async fn lock_cursor(&mut self, market_id: MarketId) -> Result<Option<ChainCursor>, StoreError> {
        let row = sqlx::query(
            "SELECT market_id, contract_address, last_processed_block, window_size, status \
             FROM chain_cursor WHERE market_id = $1 FOR UPDATE",
        )
        .bind(market_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn find_user_by_wallet(&mut self, wallet: &str) -> Result<Option<UserId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM app_user WHERE lower(wallet) = lower($1)")
            .bind(wallet)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn find_outcome(
        &mut self,
        market_id: MarketId,
        index: u32,
    ) -> Result<Option<Outcome>, StoreError> {
        let row = sqlx::query(
            "SELECT market_id, outcome_index, pool_balance, chance \
             FROM outcome WHERE market_id = $1 AND outcome_index = $2 FOR UPDATE",
        )
        .bind(market_id)
        .bind(index_to_db(index))
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(outcome_from_row).transpose()
    }

    async fn set_pool_balance(
        &mut self,
        market_id: MarketId,
        index: u32,
        pool_balance: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outcome SET pool_balance = $3 WHERE market_id = $1 AND outcome_index = $2",
        )
        .bind(market_id)
        .bind(index_to_db(index))
        .bind(pool_balance)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outcome {market_id}/{index}")));
        }
        Ok(())
    }

    async fn insert_record(&mut self, record: &DerivedRecord) -> Result<(), StoreError> {
        let log = record.log();
        let key = format!("{}:{}:{}", log.market_id, log.tx_hash, log.log_index);
        let block = block_to_db(log.block_number)?;
        let log_index = block_to_db(log.log_index)?;

        let query = match record {
            DerivedRecord::Funding(r) => sqlx::query(
                "INSERT INTO funding_transaction \
                 (market_id, tx_hash, log_index, block_number, user_id, direction, \
                  collateral, shares, allocations) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(log.market_id)
            .bind(&log.tx_hash)
            .bind(log_index)
            .bind(block)
            .bind(r.user_id)
            .bind(r.direction.as_str())
            .bind(r.collateral)
            .bind(r.shares)
            .bind(Json(&r.allocations)),
            DerivedRecord::Share(r) => sqlx::query(
                "INSERT INTO share_transaction \
                 (market_id, tx_hash, log_index, block_number, user_id, side, \
                  outcome_index, collateral_amount, fee_amount, share_amount) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(log.market_id)
            .bind(&log.tx_hash)
            .bind(log_index)
            .bind(block)
            .bind(r.user_id)
            .bind(r.side.as_str())
            .bind(index_to_db(r.outcome_index))
            .bind(r.collateral_amount)
            .bind(r.fee_amount)
            .bind(r.share_amount),
            DerivedRecord::Claim(r) => sqlx::query(
                "INSERT INTO claim_transaction \
                 (market_id, tx_hash, log_index, block_number, user_id, payout) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(log.market_id)
            .bind(&log.tx_hash)
            .bind(log_index)
            .bind(block)
            .bind(r.user_id)
            .bind(r.payout),
        };

        query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::from_insert(e, key))?;
        Ok(())
    }

    async fn enqueue_work(&mut self, kind: WorkKind, market_id: MarketId) -> Result<bool, StoreError> {
        // work_item has a partial unique index on (kind, market_id) WHERE status = 'PENDING'
        let result = sqlx::query(
            "INSERT INTO work_item (kind, market_id, status, enqueued_at) \
             VALUES ($1, $2, 'PENDING', now()) \
             ON CONFLICT DO NOTHING",
        )
        .bind(kind.as_str())
        .bind(market_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn advance_cursor(&mut self, market_id: MarketId, to: u64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE chain_cursor SET last_processed_block = $2 \
             WHERE market_id = $1 AND last_processed_block < $2",
        )
        .bind(market_id)
        .bind(block_to_db(to)?)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "cursor {market_id} behind block {to}"
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl PricingStore for PgStore {
    async fn claim_work(&self, kind: WorkKind, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "UPDATE work_item SET status = 'RUNNING' \
             WHERE id IN ( \
                 SELECT id FROM work_item \
                 WHERE kind = $1 AND status = 'PENDING' \
                 ORDER BY id LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING id, kind, market_id, status, enqueued_at",
        )
        .bind(kind.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows.iter().map(work_from_row).collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn complete_work(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE work_item SET status = 'DONE' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_work(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE work_item SET status = 'PENDING' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn outcomes(&self, market_id: MarketId) -> Result<Vec<Outcome>, StoreError> {
        let rows = sqlx::query(
            "SELECT market_id, outcome_index, pool_balance, chance \
             FROM outcome WHERE market_id = $1 ORDER BY outcome_index",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outcome_from_row).collect()
    }

    async fn update_chances(
        &self,
        market_id: MarketId,
        chances: &[(u32, Decimal)],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (index, chance) in chances {
            let result = sqlx::query(
                "UPDATE outcome SET chance = $3 WHERE market_id = $1 AND outcome_index = $2",
            )
            .bind(market_id)
            .bind(index_to_db(*index))
            .bind(*chance)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::NotFound(format!("outcome {market_id}/{index}")));
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
