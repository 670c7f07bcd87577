//! In-memory store.
//!
//! Implements [`IndexStore`] and [`PricingStore`] over a single mutex-held
//! state. A transaction owns the mutex for its whole lifetime, which gives
//! the same serialization as a row lock, and works on a private copy that
//! replaces the shared state only on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{IndexStore, IndexTx, PricingStore, StoreError};
use crate::events::cursor::ChainCursor;
use crate::events::types::DerivedRecord;
use crate::types::{
    MarketId, MarketStatus, MarketTarget, Outcome, UserId, WorkItem, WorkKind, WorkStatus,
};

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    /// Market statuses.
    pub markets: BTreeMap<MarketId, MarketStatus>,
    /// Chain cursors by market.
    pub cursors: BTreeMap<MarketId, ChainCursor>,
    /// Outcomes by `(market, index)`.
    pub outcomes: BTreeMap<(MarketId, u32), Outcome>,
    /// Wallet addresses by user.
    pub users: BTreeMap<UserId, String>,
    /// Derived rows in insertion order.
    pub records: Vec<DerivedRecord>,
    /// Work queue.
    pub work: Vec<WorkItem>,
    /// Markets whose chance updates fail.
    pub failing_chance_markets: BTreeSet<MarketId>,
    next_work_id: i64,
}

impl MemoryState {
    /// Returns the cursor of a market.
    #[must_use]
    pub fn cursor(&self, market_id: MarketId) -> Option<&ChainCursor> {
        self.cursors.get(&market_id)
    }

    /// Returns an outcome.
    #[must_use]
    pub fn outcome(&self, market_id: MarketId, index: u32) -> Option<&Outcome> {
        self.outcomes.get(&(market_id, index))
    }

    /// Returns the derived rows of a market.
    #[must_use]
    pub fn records_for(&self, market_id: MarketId) -> Vec<&DerivedRecord> {
        self.records
            .iter()
            .filter(|r| r.log().market_id == market_id)
            .collect()
    }

    /// Returns work items in a given state.
    #[must_use]
    pub fn work_in(&self, status: WorkStatus) -> Vec<&WorkItem> {
        self.work.iter().filter(|w| w.status == status).collect()
    }

    fn desired(&self) -> Vec<MarketTarget> {
        self.markets
            .iter()
            .filter(|(_, status)| status.needs_indexing())
            .filter_map(|(id, _)| {
                let cursor = self.cursors.get(id)?;
                if !cursor.is_indexable() {
                    return None;
                }
                Some(MarketTarget {
                    market_id: *id,
                    contract_address: cursor.contract_address.clone()?,
                })
            })
            .collect()
    }

    fn work_mut(&mut self, id: i64) -> Result<&mut WorkItem, StoreError> {
        self.work
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("work item {id}")))
    }
}

/// In-memory implementation of the stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_insert: AtomicBool,
    fail_next_commit: AtomicBool,
    fail_desired: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates a market.
    pub async fn insert_market(&self, market_id: MarketId, status: MarketStatus) {
        self.state.lock().await.markets.insert(market_id, status);
    }

    /// Adds or replaces a cursor.
    pub async fn set_cursor(&self, cursor: ChainCursor) {
        self.state
            .lock()
            .await
            .cursors
            .insert(cursor.market_id, cursor);
    }

    /// Adds or replaces an outcome.
    pub async fn insert_outcome(&self, outcome: Outcome) {
        self.state
            .lock()
            .await
            .outcomes
            .insert((outcome.market_id, outcome.index), outcome);
    }

    /// Removes an outcome.
    pub async fn remove_outcome(&self, market_id: MarketId, index: u32) {
        self.state.lock().await.outcomes.remove(&(market_id, index));
    }

    /// Adds a user. The wallet is stored lower-case.
    pub async fn insert_user(&self, user_id: UserId, wallet: &str) {
        self.state
            .lock()
            .await
            .users
            .insert(user_id, wallet.to_ascii_lowercase());
    }

    /// Queues a pending work item directly.
    pub async fn push_work(&self, kind: WorkKind, market_id: MarketId) -> i64 {
        let mut state = self.state.lock().await;
        push_pending(&mut state, kind, market_id)
    }

    /// Makes chance updates for a market fail.
    pub async fn fail_chances_for(&self, market_id: MarketId) {
        self.state
            .lock()
            .await
            .failing_chance_markets
            .insert(market_id);
    }

    /// Makes the first insert of the next transaction fail.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Makes the commit of the next transaction fail.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes `desired_markets` fail until switched off.
    pub fn fail_desired_markets(&self, fail: bool) {
        self.fail_desired.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of the committed state.
    ///
    /// Waits for any open transaction to finish.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

fn push_pending(state: &mut MemoryState, kind: WorkKind, market_id: MarketId) -> i64 {
    state.next_work_id += 1;
    let id = state.next_work_id;
    state.work.push(WorkItem {
        id,
        kind,
        market_id,
        status: WorkStatus::Pending,
        enqueued_at: Utc::now(),
    });
    id
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn desired_markets(&self) -> Result<Vec<MarketTarget>, StoreError> {
        if self.fail_desired.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("desired markets".to_string()));
        }
        Ok(self.state.lock().await.desired())
    }

    async fn begin(&self) -> Result<Box<dyn IndexTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_insert: self.fail_next_insert.swap(false, Ordering::SeqCst),
            fail_commit: self.fail_next_commit.swap(false, Ordering::SeqCst),
        }))
    }
}

/// Transaction over [`MemoryStore`].
struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_insert: bool,
    fail_commit: bool,
}

#[async_trait]
impl IndexTx for MemoryTx {
    async fn lock_cursor(&mut self, market_id: MarketId) -> Result<Option<ChainCursor>, StoreError> {
        Ok(self.working.cursors.get(&market_id).cloned())
    }

    async fn find_user_by_wallet(&mut self, wallet: &str) -> Result<Option<UserId>, StoreError> {
        let wallet = wallet.to_ascii_lowercase();
        Ok(self
            .working
            .users
            .iter()
            .find(|(_, w)| **w == wallet)
            .map(|(id, _)| *id))
    }

    async fn find_outcome(
        &mut self,
        market_id: MarketId,
        index: u32,
    ) -> Result<Option<Outcome>, StoreError> {
        Ok(self.working.outcomes.get(&(market_id, index)).cloned())
    }

    async fn set_pool_balance(
        &mut self,
        market_id: MarketId,
        index: u32,
        pool_balance: Decimal,
    ) -> Result<(), StoreError> {
        let outcome = self
            .working
            .outcomes
            .get_mut(&(market_id, index))
            .ok_or_else(|| StoreError::NotFound(format!("outcome {market_id}/{index}")))?;
        outcome.pool_balance = pool_balance;
        Ok(())
    }

    async fn insert_record(&mut self, record: &DerivedRecord) -> Result<(), StoreError> {
        if std::mem::take(&mut self.fail_insert) {
            return Err(StoreError::Injected("insert".to_string()));
        }
        let key = record.log();
        let exists = self.working.records.iter().any(|r| {
            let other = r.log();
            other.market_id == key.market_id
                && other.tx_hash == key.tx_hash
                && other.log_index == key.log_index
        });
        if exists {
            return Err(StoreError::Duplicate(format!(
                "{}:{}:{}",
                key.market_id, key.tx_hash, key.log_index
            )));
        }
        self.working.records.push(record.clone());
        Ok(())
    }

    async fn enqueue_work(&mut self, kind: WorkKind, market_id: MarketId) -> Result<bool, StoreError> {
        let pending = self.working.work.iter().any(|w| {
            w.kind == kind && w.market_id == market_id && w.status == WorkStatus::Pending
        });
        if pending {
            return Ok(false);
        }
        push_pending(&mut self.working, kind, market_id);
        Ok(true)
    }

    async fn advance_cursor(&mut self, market_id: MarketId, to: u64) -> Result<(), StoreError> {
        match self.working.cursors.get_mut(&market_id) {
            Some(cursor) if cursor.last_processed_block < to => {
                cursor.last_processed_block = to;
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!(
                "cursor {market_id} behind block {to}"
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Injected("commit".to_string()));
        }
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PricingStore for MemoryStore {
    async fn claim_work(&self, kind: WorkKind, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for item in state
            .work
            .iter_mut()
            .filter(|w| w.kind == kind && w.status == WorkStatus::Pending)
            .take(limit)
        {
            item.status = WorkStatus::Running;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn complete_work(&self, id: i64) -> Result<(), StoreError> {
        self.state.lock().await.work_mut(id)?.status = WorkStatus::Done;
        Ok(())
    }

    async fn release_work(&self, id: i64) -> Result<(), StoreError> {
        self.state.lock().await.work_mut(id)?.status = WorkStatus::Pending;
        Ok(())
    }

    async fn outcomes(&self, market_id: MarketId) -> Result<Vec<Outcome>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .outcomes
            .range((market_id, 0)..=(market_id, u32::MAX))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn update_chances(
        &self,
        market_id: MarketId,
        chances: &[(u32, Decimal)],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_chance_markets.contains(&market_id) {
            return Err(StoreError::Injected(format!("chances for market {market_id}")));
        }
        let mut next = state.outcomes.clone();
        for (index, chance) in chances {
            let outcome = next
                .get_mut(&(market_id, *index))
                .ok_or_else(|| StoreError::NotFound(format!("outcome {market_id}/{index}")))?;
            outcome.chance = *chance;
        }
        state.outcomes = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{ClaimRecord, LogRef};

    fn claim(tx_hash: &str) -> DerivedRecord {
        DerivedRecord::Claim(ClaimRecord {
            log: LogRef {
                market_id: 1,
                tx_hash: tx_hash.to_string(),
                block_number: 10,
                log_index: 0,
            },
            user_id: 1,
            payout: Decimal::ONE,
        })
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_market(1, MarketStatus::Active).await;
        store
            .set_cursor(ChainCursor::new(1, "0xabc", 100, 50))
            .await;
        store
    }

    #[tokio::test]
    async fn test_desired_markets_filters_status_and_cursor() {
        let store = store().await;
        store.insert_market(2, MarketStatus::Finalized).await;
        store
            .set_cursor(ChainCursor::new(2, "0xdef", 0, 10))
            .await;
        store.insert_market(3, MarketStatus::Funding).await;
        let mut without_contract = ChainCursor::new(3, "", 0, 10);
        without_contract.contract_address = None;
        store.set_cursor(without_contract).await;
        store.insert_market(4, MarketStatus::Funding).await;

        let desired = store.desired_markets().await.expect("desired");
        assert_eq!(desired.len(), 1);
        assert_eq!(desired.first().map(|t| t.market_id), Some(1));
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        tx.insert_record(&claim("0x01")).await.expect("insert");
        tx.advance_cursor(1, 150).await.expect("advance");
        tx.commit().await.expect("commit");

        let state = store.snapshot().await;
        assert_eq!(state.records_for(1).len(), 1);
        assert_eq!(state.cursor(1).map(|c| c.last_processed_block), Some(150));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        tx.insert_record(&claim("0x01")).await.expect("insert");
        tx.advance_cursor(1, 150).await.expect("advance");
        tx.rollback().await.expect("rollback");

        let state = store.snapshot().await;
        assert!(state.records.is_empty());
        assert_eq!(state.cursor(1).map(|c| c.last_processed_block), Some(100));
    }

    #[tokio::test]
    async fn test_failed_commit_discards_changes() {
        let store = store().await;
        store.fail_next_commit();
        let mut tx = store.begin().await.expect("begin");
        tx.insert_record(&claim("0x01")).await.expect("insert");
        assert!(tx.commit().await.is_err());

        assert!(store.snapshot().await.records.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        tx.insert_record(&claim("0x01")).await.expect("insert");
        let err = tx.insert_record(&claim("0x01")).await;
        assert!(matches!(err, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_injected_insert_failure_is_one_shot() {
        let store = store().await;
        store.fail_next_insert();
        let mut tx = store.begin().await.expect("begin");
        assert!(matches!(
            tx.insert_record(&claim("0x01")).await,
            Err(StoreError::Injected(_))
        ));
        tx.insert_record(&claim("0x01")).await.expect("second insert");
    }

    #[tokio::test]
    async fn test_advance_cursor_never_moves_backwards() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        assert!(tx.advance_cursor(1, 100).await.is_err());
        assert!(tx.advance_cursor(9, 200).await.is_err());
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_pending() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        assert!(tx.enqueue_work(WorkKind::RecomputeChances, 1).await.expect("enqueue"));
        assert!(!tx.enqueue_work(WorkKind::RecomputeChances, 1).await.expect("enqueue"));
        tx.commit().await.expect("commit");

        assert_eq!(store.snapshot().await.work_in(WorkStatus::Pending).len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_lookup_is_case_insensitive() {
        let store = store().await;
        store.insert_user(7, "0xABCDEF").await;
        let mut tx = store.begin().await.expect("begin");
        assert_eq!(tx.find_user_by_wallet("0xabcdef").await.expect("user"), Some(7));
        assert_eq!(tx.find_user_by_wallet("0x00").await.expect("user"), None);
    }

    #[tokio::test]
    async fn test_claim_complete_release_work() {
        let store = store().await;
        let first = store.push_work(WorkKind::RecomputeChances, 1).await;
        let second = store.push_work(WorkKind::RecomputeChances, 2).await;

        let claimed = store
            .claim_work(WorkKind::RecomputeChances, 10)
            .await
            .expect("claim");
        assert_eq!(claimed.len(), 2);
        assert!(store
            .claim_work(WorkKind::RecomputeChances, 10)
            .await
            .expect("claim")
            .is_empty());

        store.complete_work(first).await.expect("complete");
        store.release_work(second).await.expect("release");

        let state = store.snapshot().await;
        assert_eq!(state.work_in(WorkStatus::Done).len(), 1);
        assert_eq!(state.work_in(WorkStatus::Pending).len(), 1);
    }

    #[tokio::test]
    async fn test_update_chances_is_atomic() {
        let store = store().await;
        store.insert_outcome(Outcome::new(1, 0)).await;
        store.insert_outcome(Outcome::new(1, 1)).await;

        let missing = store
            .update_chances(1, &[(0, Decimal::ONE), (5, Decimal::ZERO)])
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
        let outcomes = store.outcomes(1).await.expect("outcomes");
        assert!(outcomes.iter().all(|o| o.chance.is_zero()));

        store
            .update_chances(1, &[(0, Decimal::ONE), (1, Decimal::ZERO)])
            .await
            .expect("update");
        let outcomes = store.outcomes(1).await.expect("outcomes");
        assert_eq!(outcomes.first().map(|o| o.chance), Some(Decimal::ONE));
    }
}
