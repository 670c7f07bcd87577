//! Process supervisor.
//!
//! Keeps exactly one indexer task running for every market in the desired
//! set. Each planning cycle reads the desired set, starts indexers for new
//! markets and asks indexers of departed markets to stop. Every task reports
//! its exit on a channel tagged with a generation number, so a late exit of
//! an old task never disturbs its replacement.
//!
//! Stops are cooperative: the stop signal is observed by the indexer between
//! cycles, and the exit message is the acknowledgment. A market whose
//! indexer is still stopping is not started again until that
//! acknowledgment arrives.

pub mod backoff;
pub mod launcher;
pub mod metrics;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

pub use backoff::RestartBackoff;
pub use launcher::{EventIndexerLauncher, IndexerLauncher};
pub use metrics::{SupervisorMetrics, SupervisorMetricsSnapshot};

use crate::alerts::{notify_best_effort, AlertChannel, AlertSink};
use crate::config::{IndexerConfig, SupervisorConfig};
use crate::runner::{process_name, IndexerDeps};
use crate::store::{IndexStore, StoreError};
use crate::types::{MarketId, MarketTarget};

/// Why an indexer task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The task returned after a stop signal.
    Stopped,
    /// The task returned an error.
    Failed(String),
    /// The task panicked.
    Panicked(String),
}

/// Exit notification sent by every indexer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerExit {
    /// Market the task indexed.
    pub market_id: MarketId,
    /// Generation of the task.
    pub generation: u64,
    /// Why it ended.
    pub reason: ExitReason,
}

/// What the supervisor did with an exit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitHandling {
    /// A requested stop completed.
    Acknowledged,
    /// An unsolicited exit; a restart is due after `delay`.
    RestartScheduled {
        /// Delay before the restart.
        delay: Duration,
    },
    /// The exit belonged to a task that is no longer tracked.
    Stale,
}

/// Result of one planning cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReport {
    /// Markets whose indexer was started.
    pub started: Vec<MarketId>,
    /// Markets whose indexer was asked to stop.
    pub stopped: Vec<MarketId>,
    /// Markets whose indexer kept running.
    pub unchanged: Vec<MarketId>,
    /// Desired markets not started this cycle.
    pub deferred: Vec<MarketId>,
}

impl PlanReport {
    /// Returns true if nothing was started or stopped.
    #[must_use]
    pub fn is_steady(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

struct TrackedIndexer {
    target: MarketTarget,
    generation: u64,
    started_at: Instant,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct PendingRestart {
    target: MarketTarget,
    due: Instant,
}

/// Supervises one indexer task per desired market.
pub struct Supervisor {
    config: SupervisorConfig,
    store: Arc<dyn IndexStore>,
    launcher: Arc<dyn IndexerLauncher>,
    alerts: Arc<dyn AlertSink>,
    backoff: RestartBackoff,
    metrics: Arc<SupervisorMetrics>,
    running: HashMap<MarketId, TrackedIndexer>,
    stopping: HashMap<MarketId, TrackedIndexer>,
    pending_restarts: HashMap<MarketId, PendingRestart>,
    crash_streaks: HashMap<MarketId, u32>,
    exit_tx: mpsc::UnboundedSender<IndexerExit>,
    exit_rx: mpsc::UnboundedReceiver<IndexerExit>,
    next_generation: u64,
}

impl Supervisor {
    /// Creates a supervisor.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        store: Arc<dyn IndexStore>,
        launcher: Arc<dyn IndexerLauncher>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            backoff: RestartBackoff::from_config(&config),
            config,
            store,
            launcher,
            alerts,
            metrics: Arc::new(SupervisorMetrics::new()),
            running: HashMap::new(),
            stopping: HashMap::new(),
            pending_restarts: HashMap::new(),
            crash_streaks: HashMap::new(),
            exit_tx,
            exit_rx,
            next_generation: 0,
        }
    }

    /// Creates a supervisor that runs [`crate::runner::EventIndexer`] tasks.
    #[must_use]
    pub fn for_indexers(
        config: SupervisorConfig,
        indexer_config: IndexerConfig,
        deps: IndexerDeps,
    ) -> Self {
        let store = Arc::clone(&deps.store);
        let alerts = Arc::clone(&deps.alerts);
        let launcher = Arc::new(EventIndexerLauncher::new(indexer_config, deps));
        Self::new(config, store, launcher, alerts)
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<SupervisorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the markets with a running indexer, sorted.
    #[must_use]
    pub fn running_markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.running.keys().copied().collect();
        markets.sort_unstable();
        markets
    }

    /// Returns the markets whose indexer was asked to stop and has not
    /// exited yet, sorted.
    #[must_use]
    pub fn stopping_markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.stopping.keys().copied().collect();
        markets.sort_unstable();
        markets
    }

    /// Returns true if the market has a running indexer.
    #[must_use]
    pub fn is_running(&self, market_id: MarketId) -> bool {
        self.running.contains_key(&market_id)
    }

    /// Returns true if the market waits for a crash restart.
    #[must_use]
    pub fn restart_pending(&self, market_id: MarketId) -> bool {
        self.pending_restarts.contains_key(&market_id)
    }

    /// Reconciles running indexers with the desired set.
    ///
    /// # Errors
    ///
    /// Returns the store error if the desired set cannot be read. Nothing
    /// is started or stopped in that case.
    pub async fn plan_cycle(&mut self) -> Result<PlanReport, StoreError> {
        let desired: BTreeMap<MarketId, MarketTarget> = match self.store.desired_markets().await {
            Ok(targets) => targets.into_iter().map(|t| (t.market_id, t)).collect(),
            Err(err) => {
                self.metrics.record_plan_failure();
                warn!(error = %err, "Failed to read desired markets");
                return Err(err);
            }
        };

        let mut report = PlanReport::default();

        let departed: BTreeSet<MarketId> = self
            .running
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for market_id in departed {
            self.request_stop(market_id);
            report.stopped.push(market_id);
        }

        self.pending_restarts.retain(|id, _| desired.contains_key(id));
        self.crash_streaks.retain(|id, _| desired.contains_key(id));

        for (market_id, target) in desired {
            if self.running.contains_key(&market_id) {
                report.unchanged.push(market_id);
            } else if self.stopping.contains_key(&market_id)
                || self.pending_restarts.contains_key(&market_id)
            {
                report.deferred.push(market_id);
            } else if self.spawn(target) {
                self.metrics.record_start();
                report.started.push(market_id);
            } else {
                report.deferred.push(market_id);
            }
        }

        self.metrics.record_plan_cycle();
        if report.is_steady() {
            debug!(running = self.running.len(), "Plan cycle steady");
        } else {
            info!(
                started = ?report.started,
                stopped = ?report.stopped,
                deferred = ?report.deferred,
                "Plan cycle applied"
            );
        }
        Ok(report)
    }

    /// Handles one exit notification.
    pub async fn handle_exit(&mut self, exit: IndexerExit) -> ExitHandling {
        let market_id = exit.market_id;

        if self
            .stopping
            .get(&market_id)
            .is_some_and(|t| t.generation == exit.generation)
        {
            self.stopping.remove(&market_id);
            info!(process = %process_name(market_id), reason = ?exit.reason, "Indexer stop acknowledged");
            return ExitHandling::Acknowledged;
        }

        let tracked = match self.running.get(&market_id) {
            Some(t) if t.generation == exit.generation => self.running.remove(&market_id),
            _ => None,
        };
        let Some(tracked) = tracked else {
            debug!(market_id, generation = exit.generation, "Ignoring stale exit");
            return ExitHandling::Stale;
        };

        self.metrics.record_crash();
        let reset_after = Duration::from_millis(self.config.crash_reset_after_ms);
        let streak = self.crash_streaks.entry(market_id).or_insert(0);
        if tracked.started_at.elapsed() >= reset_after {
            *streak = 0;
        }
        *streak = streak.saturating_add(1);
        let streak = *streak;
        let delay = self.backoff.delay(streak);

        error!(
            process = %process_name(market_id),
            reason = ?exit.reason,
            streak,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Indexer exited unexpectedly"
        );
        if let ExitReason::Panicked(message) = &exit.reason {
            notify_best_effort(
                self.alerts.as_ref(),
                &format!("{} panicked: {message}", process_name(market_id)),
                true,
                AlertChannel::Supervisor,
            )
            .await;
        }

        self.pending_restarts.insert(
            market_id,
            PendingRestart {
                target: tracked.target,
                due: Instant::now() + delay,
            },
        );
        if delay.is_zero() {
            self.restart_due();
        }
        ExitHandling::RestartScheduled { delay }
    }

    /// Handles an exit notification if one is queued.
    pub async fn process_next_exit(&mut self) -> Option<ExitHandling> {
        let exit = self.exit_rx.try_recv().ok()?;
        Some(self.handle_exit(exit).await)
    }

    /// Waits up to `timeout` for the next exit notification and handles it.
    pub async fn wait_next_exit(&mut self, timeout: Duration) -> Option<ExitHandling> {
        let exit = tokio::time::timeout(timeout, self.exit_rx.recv()).await.ok()??;
        Some(self.handle_exit(exit).await)
    }

    /// Restarts every crashed market whose backoff has elapsed.
    ///
    /// Returns the restarted markets, sorted.
    pub fn restart_due(&mut self) -> Vec<MarketId> {
        let now = Instant::now();
        let mut due: Vec<MarketId> = self
            .pending_restarts
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();

        let mut restarted = Vec::with_capacity(due.len());
        for market_id in due {
            let Some(pending) = self.pending_restarts.remove(&market_id) else {
                continue;
            };
            let target = pending.target.clone();
            if self.spawn(target) {
                self.metrics.record_restart();
                restarted.push(market_id);
            } else {
                self.pending_restarts.insert(market_id, pending);
            }
        }
        restarted
    }

    /// Runs planning cycles until `shutdown` turns true, then stops every
    /// indexer.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.plan_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.config.plan_interval_ms, "Supervisor started");

        loop {
            let next_restart = self.pending_restarts.values().map(|p| p.due).min();
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged and counted inside.
                    let _ = self.plan_cycle().await;
                    self.restart_due();
                }
                Some(exit) = self.exit_rx.recv() => {
                    self.handle_exit(exit).await;
                }
                () = sleep_until_due(next_restart) => {
                    self.restart_due();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stops every running indexer and waits for the acknowledgments.
    ///
    /// Tasks that do not exit within the shutdown timeout are aborted.
    pub async fn shutdown(&mut self) {
        let markets: Vec<MarketId> = self.running.keys().copied().collect();
        for market_id in markets {
            self.request_stop(market_id);
        }
        self.pending_restarts.clear();

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
        while !self.stopping.is_empty() {
            match tokio::time::timeout_at(deadline, self.exit_rx.recv()).await {
                Ok(Some(exit)) => {
                    self.handle_exit(exit).await;
                }
                Ok(None) | Err(_) => break,
            }
        }

        for (market_id, tracked) in self.stopping.drain() {
            warn!(process = %process_name(market_id), "Indexer did not stop in time, aborting");
            tracked.handle.abort();
        }
        info!("Supervisor stopped");
    }

    fn request_stop(&mut self, market_id: MarketId) {
        let Some(tracked) = self.running.remove(&market_id) else {
            return;
        };
        // A closed receiver means the task already ended; its exit is queued.
        let _ = tracked.stop.send(true);
        self.crash_streaks.remove(&market_id);
        self.metrics.record_stop();
        info!(process = %process_name(market_id), "Indexer stop requested");
        self.stopping.insert(market_id, tracked);
    }

    fn spawn(&mut self, target: MarketTarget) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(market_id = target.market_id, error = %err, "Cannot spawn indexer");
                return false;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let market_id = target.market_id;
        let (stop_tx, stop_rx) = watch::channel(false);
        let body = self.launcher.launch(target.clone(), stop_rx);
        let exits = self.exit_tx.clone();
        let span = tracing::info_span!("indexer", process = %process_name(market_id), generation);

        let handle = runtime.spawn(
            async move {
                let reason = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(Ok(())) => ExitReason::Stopped,
                    Ok(Err(err)) => ExitReason::Failed(err.to_string()),
                    Err(payload) => ExitReason::Panicked(panic_message(payload.as_ref())),
                };
                if exits
                    .send(IndexerExit {
                        market_id,
                        generation,
                        reason,
                    })
                    .is_err()
                {
                    debug!("Supervisor gone, dropping exit notification");
                }
            }
            .instrument(span),
        );

        self.running.insert(
            market_id,
            TrackedIndexer {
                target,
                generation,
                started_at: Instant::now(),
                stop: stop_tx,
                handle,
            },
        );
        info!(process = %process_name(market_id), generation, "Indexer started");
        true
    }
}

async fn sleep_until_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::future::BoxFuture;

    use super::*;
    use crate::alerts::MemoryAlertSink;
    use crate::error::IndexerError;
    use crate::events::ChainCursor;
    use crate::store::MemoryStore;
    use crate::types::MarketStatus;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Clone, Copy)]
    enum Behavior {
        UntilStopped,
        FailFirst,
        PanicFirst,
    }

    /// Launcher whose tasks only wait for the stop signal, optionally
    /// failing on their first launch.
    struct TestLauncher {
        behavior: HashMap<MarketId, Behavior>,
        launches: Mutex<HashMap<MarketId, u32>>,
    }

    impl TestLauncher {
        fn new() -> Self {
            Self {
                behavior: HashMap::new(),
                launches: Mutex::new(HashMap::new()),
            }
        }

        fn with(mut self, market_id: MarketId, behavior: Behavior) -> Self {
            self.behavior.insert(market_id, behavior);
            self
        }

        fn launches(&self, market_id: MarketId) -> u32 {
            self.launches
                .lock()
                .expect("launch counter")
                .get(&market_id)
                .copied()
                .unwrap_or(0)
        }
    }

    impl IndexerLauncher for TestLauncher {
        fn launch(
            &self,
            market: MarketTarget,
            mut stop: watch::Receiver<bool>,
        ) -> BoxFuture<'static, Result<(), IndexerError>> {
            let market_id = market.market_id;
            let launch = {
                let mut launches = self.launches.lock().expect("launch counter");
                let count = launches.entry(market_id).or_insert(0);
                *count += 1;
                *count
            };
            let behavior = self
                .behavior
                .get(&market_id)
                .copied()
                .unwrap_or(Behavior::UntilStopped);

            Box::pin(async move {
                match behavior {
                    Behavior::FailFirst if launch == 1 => {
                        return Err(IndexerError::MissingCursor(market_id));
                    }
                    Behavior::PanicFirst if launch == 1 => {
                        let missing: Option<u32> = None;
                        missing.expect("indexer blew up");
                    }
                    _ => {}
                }
                while !*stop.borrow() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
                Ok(())
            })
        }
    }

    async fn store_with(markets: &[MarketId]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for &id in markets {
            add_market(&store, id).await;
        }
        store
    }

    async fn add_market(store: &MemoryStore, market_id: MarketId) {
        store.insert_market(market_id, MarketStatus::Active).await;
        store
            .set_cursor(ChainCursor::new(market_id, format!("0xfpmm{market_id}"), 0, 100))
            .await;
    }

    fn supervisor(
        config: SupervisorConfig,
        store: &Arc<MemoryStore>,
        launcher: &Arc<TestLauncher>,
        alerts: &MemoryAlertSink,
    ) -> Supervisor {
        let store: Arc<dyn IndexStore> = Arc::clone(store) as Arc<dyn IndexStore>;
        let launcher: Arc<dyn IndexerLauncher> = Arc::clone(launcher) as Arc<dyn IndexerLauncher>;
        Supervisor::new(config, store, launcher, Arc::new(alerts.clone()))
    }

    #[tokio::test]
    async fn test_plan_starts_missing_and_stops_departed() {
        let store = store_with(&[2, 3, 4]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let mut sup = supervisor(SupervisorConfig::default(), &store, &launcher, &alerts);

        let first = sup.plan_cycle().await.expect("plan");
        assert_eq!(first.started, vec![2, 3, 4]);
        assert_eq!(sup.running_markets(), vec![2, 3, 4]);

        store.insert_market(4, MarketStatus::Finalized).await;
        add_market(&store, 1).await;

        let report = sup.plan_cycle().await.expect("plan");
        assert_eq!(report.started, vec![1]);
        assert_eq!(report.stopped, vec![4]);
        assert_eq!(report.unchanged, vec![2, 3]);
        assert_eq!(sup.running_markets(), vec![1, 2, 3]);
        assert_eq!(sup.stopping_markets(), vec![4]);

        assert_eq!(sup.wait_next_exit(WAIT).await, Some(ExitHandling::Acknowledged));
        assert!(sup.stopping_markets().is_empty());
        assert_eq!(launcher.launches(2), 1);
        assert_eq!(launcher.launches(3), 1);

        let metrics = sup.metrics().snapshot();
        assert_eq!(metrics.starts, 4);
        assert_eq!(metrics.stops, 1);
        assert_eq!(metrics.crashes, 0);
    }

    #[tokio::test]
    async fn test_steady_plan_is_noop() {
        let store = store_with(&[1, 2]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let mut sup = supervisor(SupervisorConfig::default(), &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        let report = sup.plan_cycle().await.expect("plan");
        assert!(report.is_steady());
        assert_eq!(report.unchanged, vec![1, 2]);
        assert_eq!(launcher.launches(1), 1);
    }

    #[tokio::test]
    async fn test_stopping_market_is_not_restarted_until_acknowledged() {
        let store = store_with(&[7]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let mut sup = supervisor(SupervisorConfig::default(), &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        store.insert_market(7, MarketStatus::Voting).await;
        sup.plan_cycle().await.expect("plan");
        assert_eq!(sup.stopping_markets(), vec![7]);

        store.insert_market(7, MarketStatus::Active).await;
        let deferred = sup.plan_cycle().await.expect("plan");
        assert_eq!(deferred.deferred, vec![7]);
        assert!(!sup.is_running(7));
        assert_eq!(launcher.launches(7), 1);

        assert_eq!(sup.wait_next_exit(WAIT).await, Some(ExitHandling::Acknowledged));
        let report = sup.plan_cycle().await.expect("plan");
        assert_eq!(report.started, vec![7]);
        assert_eq!(launcher.launches(7), 2);
    }

    #[tokio::test]
    async fn test_crash_restarts_immediately_with_zero_backoff() {
        let store = store_with(&[1]).await;
        let launcher = Arc::new(TestLauncher::new().with(1, Behavior::FailFirst));
        let alerts = MemoryAlertSink::new();
        let config = SupervisorConfig::default().with_restart_backoff(0, 0);
        let mut sup = supervisor(config, &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        let handling = sup.wait_next_exit(WAIT).await;
        assert_eq!(
            handling,
            Some(ExitHandling::RestartScheduled {
                delay: Duration::ZERO
            })
        );
        assert!(sup.is_running(1));
        assert_eq!(launcher.launches(1), 2);

        let metrics = sup.metrics().snapshot();
        assert_eq!(metrics.crashes, 1);
        assert_eq!(metrics.restarts, 1);
        // The indexer pages for its own fatal errors.
        assert!(alerts.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_crash_restart_waits_for_backoff() {
        let store = store_with(&[1]).await;
        let launcher = Arc::new(TestLauncher::new().with(1, Behavior::FailFirst));
        let alerts = MemoryAlertSink::new();
        let config = SupervisorConfig::default().with_restart_backoff(50, 1_000);
        let mut sup = supervisor(config, &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        let handling = sup.wait_next_exit(WAIT).await;
        assert_eq!(
            handling,
            Some(ExitHandling::RestartScheduled {
                delay: Duration::from_millis(50)
            })
        );
        assert!(sup.restart_pending(1));

        let report = sup.plan_cycle().await.expect("plan");
        assert_eq!(report.deferred, vec![1]);
        assert!(sup.restart_due().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(sup.restart_due(), vec![1]);
        assert!(sup.is_running(1));
        assert_eq!(launcher.launches(1), 2);
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_alerted() {
        let store = store_with(&[5]).await;
        let launcher = Arc::new(TestLauncher::new().with(5, Behavior::PanicFirst));
        let alerts = MemoryAlertSink::new();
        let config = SupervisorConfig::default().with_restart_backoff(0, 0);
        let mut sup = supervisor(config, &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        let handling = sup.wait_next_exit(WAIT).await;
        assert!(matches!(handling, Some(ExitHandling::RestartScheduled { .. })));
        assert!(sup.is_running(5));

        let sent = alerts.alerts().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].urgent);
        assert!(sent[0].message.contains("indexer_5"));
    }

    #[tokio::test]
    async fn test_stale_exit_is_ignored() {
        let store = store_with(&[1]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let mut sup = supervisor(SupervisorConfig::default(), &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        let handling = sup
            .handle_exit(IndexerExit {
                market_id: 1,
                generation: 999,
                reason: ExitReason::Failed("old".to_string()),
            })
            .await;
        assert_eq!(handling, ExitHandling::Stale);
        assert!(sup.is_running(1));
        assert_eq!(sup.metrics().crashes(), 0);
    }

    #[tokio::test]
    async fn test_failed_desired_query_changes_nothing() {
        let store = store_with(&[1]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let mut sup = supervisor(SupervisorConfig::default(), &store, &launcher, &alerts);

        sup.plan_cycle().await.expect("plan");
        store.fail_desired_markets(true);
        assert!(sup.plan_cycle().await.is_err());
        assert_eq!(sup.running_markets(), vec![1]);
        assert_eq!(sup.metrics().plan_failures(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_all_indexers_on_shutdown() {
        let store = store_with(&[1, 2, 3]).await;
        let launcher = Arc::new(TestLauncher::new());
        let alerts = MemoryAlertSink::new();
        let config = SupervisorConfig::default().with_plan_interval(10);
        let sup = supervisor(config, &store, &launcher, &alerts);
        let metrics = sup.metrics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sup.run(shutdown_rx));

        let deadline = std::time::Instant::now() + WAIT;
        while metrics.starts() < 3 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(metrics.starts(), 3);

        shutdown_tx.send(true).expect("shutdown");
        tokio::time::timeout(WAIT, task)
            .await
            .expect("supervisor stopped")
            .expect("join");
        assert_eq!(metrics.stops(), 3);
        assert_eq!(metrics.crashes(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
