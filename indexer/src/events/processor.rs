//! Event processor implementation.
//!
//! Applies one window of decoded chain logs inside an open store
//! transaction: resolves referenced users and outcomes, adjusts pool
//! balances, inserts the derived rows and enqueues follow-up work.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::cursor::BlockWindow;
use super::derive::{
    apply_pool_delta, buy_pool_delta, checked_sum, sell_pool_delta, split_by_complement,
    split_proportional,
};
use super::metrics::IndexerMetrics;
use super::types::{
    ClaimRecord, DerivedRecord, FundingDirection, FundingRecord, LogRef, ProcessingResult,
    ShareTransaction, TradeSide,
};
use crate::chain::{ChainLog, MarketEvent};
use crate::error::IndexerError;
use crate::store::IndexTx;
use crate::types::{MarketId, UserId, WorkKind};

/// Derives domain rows from chain logs.
///
/// Stateless apart from shared metrics; every read and write goes through
/// the transaction passed to [`EventProcessor::apply`], so an error leaves
/// nothing behind once the caller rolls back.
///
/// # Example
///
/// ```rust,ignore
/// let processor = EventProcessor::new(metrics);
/// let mut tx = store.begin().await?;
/// let result = processor.apply(tx.as_mut(), market_id, &window, &logs).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct EventProcessor {
    metrics: Arc<IndexerMetrics>,
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new(Arc::new(IndexerMetrics::new()))
    }
}

impl EventProcessor {
    /// Creates a processor reporting into the given metrics.
    #[must_use]
    pub const fn new(metrics: Arc<IndexerMetrics>) -> Self {
        Self { metrics }
    }

    /// Returns a reference to the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<IndexerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Applies a window of logs.
    ///
    /// Logs must lie inside `window` and be strictly ordered by
    /// `(block_number, log_index)`. A cycle that inserted at least one row
    /// leaves a pending `recompute_chances` item for the market.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::MissingReference`] if a wallet or outcome is
    /// unknown, [`IndexerError::Integrity`] for ordering violations or pool
    /// underflow, and store errors as they occur. The transaction must be
    /// rolled back on any error.
    pub async fn apply(
        &self,
        tx: &mut dyn IndexTx,
        market_id: MarketId,
        window: &BlockWindow,
        logs: &[ChainLog],
    ) -> Result<ProcessingResult, IndexerError> {
        validate_order(market_id, window, logs)?;

        let mut result = ProcessingResult::empty();
        for log in logs {
            let record = self.derive(tx, market_id, log).await?;
            tx.insert_record(&record).await?;

            let kind = record.kind();
            self.metrics.record_event(kind);
            result.record(kind);
        }

        if !result.is_empty() {
            let queued = tx.enqueue_work(WorkKind::RecomputeChances, market_id).await?;
            if !queued {
                tracing::debug!(market_id, "Chance recompute already pending");
            }
            result.recompute_enqueued = true;
        }

        Ok(result)
    }

    async fn derive(
        &self,
        tx: &mut dyn IndexTx,
        market_id: MarketId,
        log: &ChainLog,
    ) -> Result<DerivedRecord, IndexerError> {
        let user_id = resolve_user(tx, market_id, log).await?;
        let log_ref = LogRef {
            market_id,
            tx_hash: log.tx_hash.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
        };

        let record = match &log.event {
            MarketEvent::FundingAdded {
                amounts_added,
                shares_minted,
                ..
            } => {
                for (index, amount) in (0u32..).zip(amounts_added) {
                    adjust_pool(tx, market_id, log, index, *amount).await?;
                }
                DerivedRecord::Funding(FundingRecord {
                    log: log_ref,
                    user_id,
                    direction: FundingDirection::Add,
                    collateral: checked_sum(amounts_added)
                        .ok_or_else(|| out_of_range(market_id, log, "funding collateral"))?,
                    shares: *shares_minted,
                    allocations: split_by_complement(*shares_minted, amounts_added)
                        .ok_or_else(|| out_of_range(market_id, log, "pool share split"))?,
                })
            }

            MarketEvent::FundingRemoved {
                amounts_removed,
                collateral_removed,
                shares_burnt,
                ..
            } => {
                for (index, amount) in (0u32..).zip(amounts_removed) {
                    adjust_pool(tx, market_id, log, index, -*amount).await?;
                }
                DerivedRecord::Funding(FundingRecord {
                    log: log_ref,
                    user_id,
                    direction: FundingDirection::Remove,
                    collateral: *collateral_removed,
                    shares: *shares_burnt,
                    allocations: split_proportional(*shares_burnt, amounts_removed)
                        .ok_or_else(|| out_of_range(market_id, log, "pool share split"))?,
                })
            }

            MarketEvent::Buy {
                investment_amount,
                fee_amount,
                outcome_index,
                outcome_tokens_bought,
                ..
            } => {
                let delta = buy_pool_delta(*investment_amount, *fee_amount)
                    .ok_or_else(|| out_of_range(market_id, log, "buy amount"))?;
                adjust_pool(tx, market_id, log, *outcome_index, delta).await?;
                DerivedRecord::Share(ShareTransaction {
                    log: log_ref,
                    user_id,
                    side: TradeSide::Buy,
                    outcome_index: *outcome_index,
                    collateral_amount: *investment_amount,
                    fee_amount: *fee_amount,
                    share_amount: *outcome_tokens_bought,
                })
            }

            MarketEvent::Sell {
                return_amount,
                fee_amount,
                outcome_index,
                outcome_tokens_sold,
                ..
            } => {
                let delta = sell_pool_delta(*return_amount, *fee_amount)
                    .ok_or_else(|| out_of_range(market_id, log, "sell amount"))?;
                adjust_pool(tx, market_id, log, *outcome_index, delta).await?;
                DerivedRecord::Share(ShareTransaction {
                    log: log_ref,
                    user_id,
                    side: TradeSide::Sell,
                    outcome_index: *outcome_index,
                    collateral_amount: *return_amount,
                    fee_amount: *fee_amount,
                    share_amount: *outcome_tokens_sold,
                })
            }

            MarketEvent::Claim { payout, .. } => DerivedRecord::Claim(ClaimRecord {
                log: log_ref,
                user_id,
                payout: *payout,
            }),
        };

        Ok(record)
    }
}

/// Checks that logs are inside the window and strictly increasing.
fn validate_order(
    market_id: MarketId,
    window: &BlockWindow,
    logs: &[ChainLog],
) -> Result<(), IndexerError> {
    if let Some(outside) = logs.iter().find(|l| !window.contains(l.block_number)) {
        return Err(IndexerError::integrity(
            market_id,
            format!(
                "log {} at block {} outside window [{}, {}]",
                outside.tx_hash, outside.block_number, window.from, window.to
            ),
        ));
    }

    for pair in logs.windows(2) {
        if let [a, b] = pair {
            if a.position() >= b.position() {
                return Err(IndexerError::integrity(
                    market_id,
                    format!(
                        "log ({}, {}) not after ({}, {})",
                        b.block_number, b.log_index, a.block_number, a.log_index
                    ),
                ));
            }
        }
    }
    Ok(())
}

async fn resolve_user(
    tx: &mut dyn IndexTx,
    market_id: MarketId,
    log: &ChainLog,
) -> Result<UserId, IndexerError> {
    let wallet = log.event.wallet();
    tx.find_user_by_wallet(wallet)
        .await?
        .ok_or_else(|| IndexerError::MissingReference {
            market_id,
            entity: format!("user with wallet {wallet}"),
            tx_hash: log.tx_hash.clone(),
        })
}

fn out_of_range(market_id: MarketId, log: &ChainLog, what: &str) -> IndexerError {
    IndexerError::integrity(
        market_id,
        format!("{what} exceeds decimal range in tx {}", log.tx_hash),
    )
}

/// Adds `delta` to an outcome pool, rejecting underflow.
async fn adjust_pool(
    tx: &mut dyn IndexTx,
    market_id: MarketId,
    log: &ChainLog,
    index: u32,
    delta: Decimal,
) -> Result<(), IndexerError> {
    let outcome = tx
        .find_outcome(market_id, index)
        .await?
        .ok_or_else(|| IndexerError::MissingReference {
            market_id,
            entity: format!("outcome {index}"),
            tx_hash: log.tx_hash.clone(),
        })?;

    let balance = apply_pool_delta(outcome.pool_balance, delta).ok_or_else(|| {
        IndexerError::integrity(
            market_id,
            format!(
                "pool {index} out of range: {} + ({delta}) in tx {}",
                outcome.pool_balance, log.tx_hash
            ),
        )
    })?;
    tx.set_pool_balance(market_id, index, balance).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::cursor::ChainCursor;
    use crate::store::{IndexStore, MemoryStore};
    use crate::types::{MarketStatus, Outcome, WorkStatus};

    const FUNDER: &str = "0x00000000000000000000000000000000000000f1";
    const TRADER: &str = "0x00000000000000000000000000000000000000a2";

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn log(block: u64, index: u64, event: MarketEvent) -> ChainLog {
        ChainLog {
            tx_hash: format!("0x{block:04x}{index:02x}"),
            block_number: block,
            log_index: index,
            event,
        }
    }

    fn funding_added(amounts: &[i64], minted: i64) -> MarketEvent {
        MarketEvent::FundingAdded {
            funder: FUNDER.to_string(),
            amounts_added: amounts.iter().map(|a| dec(*a)).collect(),
            shares_minted: dec(minted),
        }
    }

    fn window() -> BlockWindow {
        BlockWindow { from: 101, to: 150 }
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_market(1, MarketStatus::Active).await;
        store.set_cursor(ChainCursor::new(1, "0xfpmm", 100, 50)).await;
        for index in 0..3 {
            store.insert_outcome(Outcome::new(1, index)).await;
        }
        store.insert_user(10, FUNDER).await;
        store.insert_user(11, TRADER).await;
        store
    }

    #[tokio::test]
    async fn test_funding_added_splits_by_complement() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![
            log(120, 0, funding_added(&[50, 30, 20], 100)),
            log(130, 1, funding_added(&[50, 30, 20], 100)),
        ];

        let mut tx = store.begin().await.expect("begin");
        let result = processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect("apply");
        tx.commit().await.expect("commit");

        assert_eq!(result.events_processed, 2);
        assert_eq!(result.fundings, 2);
        assert!(result.recompute_enqueued);

        let state = store.snapshot().await;
        assert_eq!(state.outcome(1, 0).map(|o| o.pool_balance), Some(dec(100)));
        assert_eq!(state.outcome(1, 1).map(|o| o.pool_balance), Some(dec(60)));
        assert_eq!(state.outcome(1, 2).map(|o| o.pool_balance), Some(dec(40)));

        let records = state.records_for(1);
        assert_eq!(records.len(), 2);
        let first = records
            .first()
            .and_then(|r| match r {
                DerivedRecord::Funding(f) => Some(f),
                _ => None,
            })
            .expect("funding record");
        let shares: Vec<Decimal> = first.allocations.iter().map(|a| a.pool_shares).collect();
        assert_eq!(shares, vec![dec(25), dec(35), dec(40)]);
        assert_eq!(first.user_id, 10);
        assert_eq!(first.collateral, dec(100));
        assert_eq!(state.work_in(WorkStatus::Pending).len(), 1);
    }

    #[tokio::test]
    async fn test_trades_adjust_pool_net_of_fees() {
        let store = store().await;
        store
            .insert_outcome(Outcome::new(1, 1).with_pool(dec(100)))
            .await;
        let processor = EventProcessor::default();
        let logs = vec![
            log(
                110,
                0,
                MarketEvent::Buy {
                    buyer: TRADER.to_string(),
                    investment_amount: dec(20),
                    fee_amount: dec(2),
                    outcome_index: 1,
                    outcome_tokens_bought: dec(30),
                },
            ),
            log(
                110,
                3,
                MarketEvent::Sell {
                    seller: TRADER.to_string(),
                    return_amount: dec(10),
                    fee_amount: dec(1),
                    outcome_index: 1,
                    outcome_tokens_sold: dec(12),
                },
            ),
        ];

        let mut tx = store.begin().await.expect("begin");
        let result = processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect("apply");
        tx.commit().await.expect("commit");

        assert_eq!(result.trades, 2);
        let state = store.snapshot().await;
        // 100 + (20 - 2) - (10 + 1)
        assert_eq!(state.outcome(1, 1).map(|o| o.pool_balance), Some(dec(107)));
        let sides: Vec<TradeSide> = state
            .records
            .iter()
            .filter_map(|r| match r {
                DerivedRecord::Share(s) => Some(s.side),
                _ => None,
            })
            .collect();
        assert_eq!(sides, vec![TradeSide::Buy, TradeSide::Sell]);
    }

    #[tokio::test]
    async fn test_claim_does_not_touch_pools() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![log(
            150,
            0,
            MarketEvent::Claim {
                redeemer: TRADER.to_string(),
                payout: dec(5),
            },
        )];

        let mut tx = store.begin().await.expect("begin");
        let result = processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect("apply");
        tx.commit().await.expect("commit");

        assert_eq!(result.claims, 1);
        let state = store.snapshot().await;
        assert!(state.outcomes.values().all(|o| o.pool_balance.is_zero()));
    }

    #[tokio::test]
    async fn test_missing_outcome_is_missing_reference() {
        let store = store().await;
        store.remove_outcome(1, 2).await;
        let processor = EventProcessor::default();
        let logs = vec![log(120, 0, funding_added(&[50, 30, 20], 100))];

        let mut tx = store.begin().await.expect("begin");
        let err = processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect_err("missing outcome");
        tx.rollback().await.expect("rollback");

        assert!(matches!(err, IndexerError::MissingReference { .. }));
        assert!(store.snapshot().await.records.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_wallet_is_missing_reference() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![log(
            120,
            0,
            MarketEvent::Claim {
                redeemer: "0xdead".to_string(),
                payout: dec(1),
            },
        )];

        let mut tx = store.begin().await.expect("begin");
        let err = processor.apply(tx.as_mut(), 1, &window(), &logs).await;
        assert!(matches!(err, Err(IndexerError::MissingReference { .. })));
    }

    #[tokio::test]
    async fn test_funding_removed_underflow_is_integrity_error() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![log(
            120,
            0,
            MarketEvent::FundingRemoved {
                funder: FUNDER.to_string(),
                amounts_removed: vec![dec(1), dec(0), dec(0)],
                collateral_removed: dec(0),
                shares_burnt: dec(1),
            },
        )];

        let mut tx = store.begin().await.expect("begin");
        let err = processor.apply(tx.as_mut(), 1, &window(), &logs).await;
        assert!(matches!(err, Err(IndexerError::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_funding_added_with_wei_amounts() {
        let store = store().await;
        let processor = EventProcessor::default();
        let wei = |units: i64| dec(units) * dec(1_000_000_000_000_000_000);
        let logs = vec![log(
            120,
            0,
            MarketEvent::FundingAdded {
                funder: FUNDER.to_string(),
                amounts_added: vec![wei(100), wei(60), wei(40)],
                shares_minted: wei(200),
            },
        )];

        let mut tx = store.begin().await.expect("begin");
        processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect("apply");
        tx.commit().await.expect("commit");

        let state = store.snapshot().await;
        assert_eq!(state.outcome(1, 0).map(|o| o.pool_balance), Some(wei(100)));
        let funding = state
            .records_for(1)
            .into_iter()
            .find_map(|r| match r {
                DerivedRecord::Funding(f) => Some(f.clone()),
                _ => None,
            })
            .expect("funding record");
        let shares: Vec<Decimal> = funding.allocations.iter().map(|a| a.pool_shares).collect();
        assert_eq!(shares, vec![wei(50), wei(70), wei(80)]);
        assert_eq!(funding.collateral, wei(200));
    }

    #[tokio::test]
    async fn test_amount_out_of_decimal_range_is_integrity_error() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![log(
            120,
            0,
            MarketEvent::Sell {
                seller: TRADER.to_string(),
                return_amount: Decimal::MAX,
                fee_amount: dec(1),
                outcome_index: 0,
                outcome_tokens_sold: dec(1),
            },
        )];

        let mut tx = store.begin().await.expect("begin");
        let err = processor.apply(tx.as_mut(), 1, &window(), &logs).await;
        assert!(matches!(err, Err(IndexerError::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_rejects_unordered_and_out_of_window_logs() {
        let store = store().await;
        let processor = EventProcessor::default();
        let claim = || MarketEvent::Claim {
            redeemer: TRADER.to_string(),
            payout: dec(1),
        };

        let mut tx = store.begin().await.expect("begin");
        let unordered = vec![log(130, 0, claim()), log(120, 0, claim())];
        assert!(matches!(
            processor.apply(tx.as_mut(), 1, &window(), &unordered).await,
            Err(IndexerError::Integrity { .. })
        ));

        let outside = vec![log(151, 0, claim())];
        assert!(matches!(
            processor.apply(tx.as_mut(), 1, &window(), &outside).await,
            Err(IndexerError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_window_enqueues_nothing() {
        let store = store().await;
        let processor = EventProcessor::default();

        let mut tx = store.begin().await.expect("begin");
        let result = processor
            .apply(tx.as_mut(), 1, &window(), &[])
            .await
            .expect("apply");
        tx.commit().await.expect("commit");

        assert!(result.is_empty());
        assert!(!result.recompute_enqueued);
        assert!(store.snapshot().await.work.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_count_events() {
        let store = store().await;
        let processor = EventProcessor::default();
        let logs = vec![log(120, 0, funding_added(&[1, 1, 1], 3))];

        let mut tx = store.begin().await.expect("begin");
        processor
            .apply(tx.as_mut(), 1, &window(), &logs)
            .await
            .expect("apply");

        assert_eq!(
            processor.metrics().events(crate::chain::EventKind::FundingAdded),
            1
        );
    }
}
