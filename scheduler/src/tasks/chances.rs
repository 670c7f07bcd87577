//! Outcome chance recomputation.

use std::sync::Arc;

use async_trait::async_trait;
use marketsync_indexer::store::{PricingStore, StoreError};
use marketsync_indexer::types::{MarketId, WorkItem, WorkKind};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::fanout::FanOutTask;

/// Decimal places kept in a stored chance.
pub const CHANCE_SCALE: u32 = 8;

/// Default number of work items claimed per pass.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Computes outcome chances from pool balances.
///
/// `chance_i = (1 / pool_i) / Σ (1 / pool_j)`: a smaller pool means the
/// outcome is more expensive and more likely. Any empty or negative pool
/// yields equal chances.
#[must_use]
pub fn compute_chances(pools: &[Decimal]) -> Vec<Decimal> {
    if pools.is_empty() {
        return Vec::new();
    }
    let count = Decimal::from(pools.len());
    if pools.iter().any(|p| *p <= Decimal::ZERO) {
        let equal = (Decimal::ONE / count).round_dp(CHANCE_SCALE);
        return vec![equal; pools.len()];
    }

    // Scaled by the smallest pool: every ratio lies in (0, 1] and the sum in
    // [1, n], so raw token amounts neither overflow nor vanish.
    let smallest = pools.iter().copied().min().unwrap_or(Decimal::ONE);
    let ratios: Vec<Decimal> = pools.iter().map(|p| smallest / *p).collect();
    let total: Decimal = ratios.iter().copied().sum();
    ratios
        .iter()
        .map(|ratio| (*ratio / total).round_dp(CHANCE_SCALE))
        .collect()
}

/// Recomputes and stores the chances of one market.
///
/// Returns the number of outcomes updated.
///
/// # Errors
///
/// Returns the store error if reading outcomes or writing chances fails.
pub async fn recompute_market(store: &dyn PricingStore, market_id: MarketId) -> Result<usize, StoreError> {
    let outcomes = store.outcomes(market_id).await?;
    if outcomes.is_empty() {
        debug!(market_id, "Market has no outcomes");
        return Ok(0);
    }

    let pools: Vec<Decimal> = outcomes.iter().map(|o| o.pool_balance).collect();
    let updates: Vec<(u32, Decimal)> = outcomes
        .iter()
        .zip(compute_chances(&pools))
        .map(|(outcome, chance)| (outcome.index, chance))
        .collect();
    store.update_chances(market_id, &updates).await?;
    debug!(market_id, outcomes = updates.len(), "Chances updated");
    Ok(updates.len())
}

/// Fan-out worker draining queued `recompute_chances` items.
pub struct ChanceRecomputeWorker {
    store: Arc<dyn PricingStore>,
    batch_size: usize,
}

impl ChanceRecomputeWorker {
    /// Creates a worker claiming up to `batch_size` items per pass.
    #[must_use]
    pub fn new(store: Arc<dyn PricingStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl FanOutTask for ChanceRecomputeWorker {
    type Item = WorkItem;

    fn name(&self) -> &str {
        "recompute-chances"
    }

    async fn plan(&self) -> Result<Vec<WorkItem>, JobError> {
        Ok(self
            .store
            .claim_work(WorkKind::RecomputeChances, self.batch_size)
            .await?)
    }

    async fn execute(&self, item: &WorkItem) -> anyhow::Result<()> {
        recompute_market(self.store.as_ref(), item.market_id).await?;
        self.store.complete_work(item.id).await?;
        Ok(())
    }

    async fn on_failure(&self, item: &WorkItem, _error: &anyhow::Error) {
        if let Err(err) = self.store.release_work(item.id).await {
            warn!(work_id = item.id, market_id = item.market_id, error = %err, "Failed to release work item");
        }
    }
}

#[cfg(test)]
mod tests {
    use marketsync_indexer::store::MemoryStore;
    use marketsync_indexer::types::{Outcome, WorkStatus};

    use super::*;
    use crate::fanout::FanOutWorker;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    async fn market(store: &MemoryStore, market_id: MarketId, pools: &[i64]) {
        for (index, pool) in pools.iter().enumerate() {
            let index = u32::try_from(index).expect("index");
            store
                .insert_outcome(Outcome::new(market_id, index).with_pool(dec(*pool)))
                .await;
        }
    }

    #[test]
    fn test_compute_chances_inverse_pools() {
        let chances = compute_chances(&[dec(25), dec(75)]);
        assert_eq!(chances, vec![Decimal::new(75, 2), Decimal::new(25, 2)]);
    }

    #[test]
    fn test_compute_chances_equal_pools() {
        let chances = compute_chances(&[dec(10), dec(10), dec(10), dec(10)]);
        assert!(chances.iter().all(|c| *c == Decimal::new(25, 2)));
    }

    #[test]
    fn test_compute_chances_zero_pool_is_uniform() {
        let chances = compute_chances(&[dec(0), dec(40)]);
        assert_eq!(chances, vec![Decimal::new(5, 1), Decimal::new(5, 1)]);
    }

    #[test]
    fn test_compute_chances_rounds_and_sums_near_one() {
        let chances = compute_chances(&[dec(1), dec(2), dec(3)]);
        let total: Decimal = chances.iter().copied().sum();
        assert!((total - Decimal::ONE).abs() <= Decimal::new(3, 8));
        assert!(chances.iter().all(|c| c.scale() <= CHANCE_SCALE));
        assert!(chances[0] > chances[1] && chances[1] > chances[2]);
    }

    #[test]
    fn test_compute_chances_wei_pools() {
        let wei = |units: i64| dec(units) * dec(1_000_000_000_000_000_000);
        let chances = compute_chances(&[wei(25), wei(75)]);
        assert_eq!(chances, vec![Decimal::new(75, 2), Decimal::new(25, 2)]);

        let huge = compute_chances(&[Decimal::MAX, Decimal::MAX]);
        assert_eq!(huge, vec![Decimal::new(5, 1), Decimal::new(5, 1)]);
    }

    #[test]
    fn test_compute_chances_empty() {
        assert!(compute_chances(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_recompute_market_updates_outcomes() {
        let store = MemoryStore::new();
        market(&store, 1, &[25, 75]).await;

        let updated = recompute_market(&store, 1).await.expect("recompute");

        assert_eq!(updated, 2);
        let state = store.snapshot().await;
        assert_eq!(state.outcome(1, 0).expect("outcome").chance, Decimal::new(75, 2));
        assert_eq!(state.outcome(1, 1).expect("outcome").chance, Decimal::new(25, 2));
    }

    #[tokio::test]
    async fn test_worker_completes_items_and_releases_failures() {
        let store = Arc::new(MemoryStore::new());
        market(&store, 1, &[50, 50]).await;
        market(&store, 2, &[10, 30]).await;
        store.push_work(WorkKind::RecomputeChances, 1).await;
        store.push_work(WorkKind::RecomputeChances, 2).await;
        store.fail_chances_for(2).await;

        let worker = ChanceRecomputeWorker::new(Arc::clone(&store) as Arc<dyn PricingStore>, 10);
        let report = FanOutWorker::new(2).run(&worker).await.expect("run");

        assert_eq!(report.planned, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        let state = store.snapshot().await;
        let done: Vec<MarketId> = state.work_in(WorkStatus::Done).iter().map(|w| w.market_id).collect();
        let pending: Vec<MarketId> = state
            .work_in(WorkStatus::Pending)
            .iter()
            .map(|w| w.market_id)
            .collect();
        assert_eq!(done, vec![1]);
        assert_eq!(pending, vec![2]);
        assert_eq!(state.outcome(1, 0).expect("outcome").chance, Decimal::new(5, 1));
    }

    #[tokio::test]
    async fn test_worker_plans_nothing_without_work() {
        let store = Arc::new(MemoryStore::new());
        let worker = ChanceRecomputeWorker::new(Arc::clone(&store) as Arc<dyn PricingStore>, 10);
        let report = FanOutWorker::default().run(&worker).await.expect("run");
        assert_eq!(report.planned, 0);
    }
}
