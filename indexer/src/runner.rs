//! Per-market event indexer loop.
//!
//! One [`EventIndexer`] owns one market. Each cycle opens a transaction,
//! locks the cursor, computes the safe window, fetches and applies the
//! window's logs, advances the cursor and commits. Any error rolls the
//! whole cycle back, so the next attempt re-reads the identical window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use crate::alerts::audit::write_best_effort;
use crate::alerts::{notify_best_effort, AlertChannel, AlertSink, AuditEntry, AuditSink, Severity};
use crate::chain::{fetch_ordered, ChainClient};
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::events::cursor::ChainCursor;
use crate::events::{CycleOutcome, EventProcessor, IndexerMetrics};
use crate::store::{IndexStore, IndexTx};
use crate::types::{MarketId, MarketTarget};

/// Shared collaborators of every indexer task.
#[derive(Clone)]
pub struct IndexerDeps {
    /// Chain access.
    pub chain: Arc<dyn ChainClient>,
    /// Database access.
    pub store: Arc<dyn IndexStore>,
    /// Operator alerts.
    pub alerts: Arc<dyn AlertSink>,
    /// Audit trail.
    pub audit: Arc<dyn AuditSink>,
    /// Shared metrics.
    pub metrics: Arc<IndexerMetrics>,
}

/// Returns the task name of a market's indexer.
#[must_use]
pub fn process_name(market_id: MarketId) -> String {
    format!("indexer_{market_id}")
}

/// Indexer for one market.
pub struct EventIndexer {
    market: MarketTarget,
    config: IndexerConfig,
    deps: IndexerDeps,
    processor: EventProcessor,
}

impl EventIndexer {
    /// Creates an indexer.
    #[must_use]
    pub fn new(market: MarketTarget, config: IndexerConfig, deps: IndexerDeps) -> Self {
        let processor = EventProcessor::new(Arc::clone(&deps.metrics));
        Self {
            market,
            config,
            deps,
            processor,
        }
    }

    /// Returns the market id.
    #[must_use]
    pub const fn market_id(&self) -> MarketId {
        self.market.market_id
    }

    /// Runs one cycle.
    ///
    /// Returns [`CycleOutcome::Idle`] when no safe block is available; the
    /// transaction is rolled back and nothing changes.
    ///
    /// # Errors
    ///
    /// Returns the cycle error after rolling back. If the rollback fails
    /// too, returns [`IndexerError::DoubleFault`].
    pub async fn run_cycle(&self) -> Result<CycleOutcome, IndexerError> {
        let started = Instant::now();
        let mut tx = self.deps.store.begin().await?;

        match self.apply_next_window(tx.as_mut()).await {
            Ok(outcome @ CycleOutcome::Idle { .. }) => {
                tx.rollback().await?;
                self.deps.metrics.record_idle();
                Ok(outcome)
            }
            Ok(outcome) => {
                if let Err(e) = tx.commit().await {
                    self.deps.metrics.record_rollback();
                    return Err(IndexerError::Commit(e));
                }
                self.deps.metrics.record_commit(started.elapsed());
                Ok(outcome)
            }
            Err(err) => {
                self.deps.metrics.record_rollback();
                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(IndexerError::DoubleFault {
                        original: Box::new(err),
                        rollback,
                    }),
                }
            }
        }
    }

    async fn apply_next_window(&self, tx: &mut dyn IndexTx) -> Result<CycleOutcome, IndexerError> {
        let market_id = self.market.market_id;
        let mut cursor = tx
            .lock_cursor(market_id)
            .await?
            .ok_or(IndexerError::MissingCursor(market_id))?;
        if cursor.window_size == 0 {
            cursor.window_size = self.config.default_window_size;
        }

        let head = self.deps.chain.block_number().await?;
        let lag = self.config.confirmation_lag;
        let Some(window) = cursor.next_window(head, lag) else {
            return Ok(CycleOutcome::Idle {
                from: cursor.next_block(),
                safe_head: ChainCursor::safe_head(head, lag),
            });
        };

        let contract = cursor
            .contract_address
            .clone()
            .unwrap_or_else(|| self.market.contract_address.clone());
        let logs = fetch_ordered(self.deps.chain.as_ref(), &contract, window.from, window.to).await?;

        let result = self.processor.apply(tx, market_id, &window, &logs).await?;

        cursor.advance(&window)?;
        tx.advance_cursor(market_id, window.to).await?;

        tracing::debug!(
            market_id,
            from = window.from,
            to = window.to,
            events = result.events_processed,
            lag = cursor.lag_behind(head, lag),
            "Applied window"
        );
        Ok(CycleOutcome::Committed { window, result })
    }

    /// Runs cycles until stopped or a non-transient error occurs.
    ///
    /// The stop signal is checked only between cycles, so an in-flight
    /// commit always completes. A dropped sender counts as a stop.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error after logging it, writing an
    /// audit entry and sending an urgent alert that share one correlation id.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<(), IndexerError> {
        let sleep = Duration::from_millis(self.config.sleep_interval_ms);
        tracing::info!(
            market_id = self.market.market_id,
            contract = %self.market.contract_address,
            "Indexer started"
        );

        loop {
            match self.run_cycle().await {
                Ok(CycleOutcome::Idle { from, safe_head }) => {
                    tracing::trace!(market_id = self.market.market_id, from, safe_head, "No new safe blocks");
                }
                Ok(CycleOutcome::Committed { window, result }) => {
                    if !result.is_empty() {
                        tracing::info!(
                            market_id = self.market.market_id,
                            from = window.from,
                            to = window.to,
                            fundings = result.fundings,
                            trades = result.trades,
                            claims = result.claims,
                            "Committed window"
                        );
                    }
                }
                Err(err) if err.is_transient() => {
                    self.deps.metrics.record_transient_error();
                    tracing::warn!(
                        market_id = self.market.market_id,
                        error = %err,
                        "Transient indexer error, retrying next cycle"
                    );
                }
                Err(err) => {
                    self.report_fatal(&err).await;
                    return Err(err);
                }
            }

            if wait_for_stop(&mut stop, sleep).await {
                tracing::info!(market_id = self.market.market_id, "Indexer stopped");
                return Ok(());
            }
        }
    }

    async fn report_fatal(&self, err: &IndexerError) {
        let market_id = self.market.market_id;
        let correlation_id = Uuid::new_v4();
        self.deps.metrics.record_fatal_error();

        tracing::error!(
            market_id,
            correlation_id = %correlation_id,
            category = err.category(),
            error = %err,
            "Indexer cycle failed"
        );

        let entry = AuditEntry::new(Severity::Critical, format!("{} failed", process_name(market_id)))
            .with_context(json!({
                "market_id": market_id,
                "contract": self.market.contract_address,
                "category": err.category(),
            }))
            .with_error(err)
            .with_correlation_id(correlation_id);
        write_best_effort(self.deps.audit.as_ref(), entry).await;

        notify_best_effort(
            self.deps.alerts.as_ref(),
            &format!("{} stopped [{correlation_id}]: {err}", process_name(market_id)),
            true,
            AlertChannel::Indexer,
        )
        .await;
    }
}

/// Sleeps for `duration` unless a stop is signalled first.
///
/// Returns true if the caller should stop.
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}
