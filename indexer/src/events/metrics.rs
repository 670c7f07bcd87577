//! Metrics tracking for the event indexer.
//!
//! Provides atomic counters shared by every indexer task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::chain::EventKind;

/// Metrics for the event indexer.
#[derive(Debug)]
pub struct IndexerMetrics {
    /// Cycles that committed a window.
    cycles_committed: AtomicU64,

    /// Cycles with no safe blocks.
    cycles_idle: AtomicU64,

    /// Funding adds applied.
    funding_added: AtomicU64,

    /// Funding removals applied.
    funding_removed: AtomicU64,

    /// Buys applied.
    buys: AtomicU64,

    /// Sells applied.
    sells: AtomicU64,

    /// Claims applied.
    claims: AtomicU64,

    /// Cycles rolled back after an error.
    rollbacks: AtomicU64,

    /// Transient errors (logged and retried).
    transient_errors: AtomicU64,

    /// Fatal errors (paged, task exits).
    fatal_errors: AtomicU64,

    /// Total time spent in committed cycles, in nanoseconds.
    total_cycle_time_ns: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycles_committed: AtomicU64::new(0),
            cycles_idle: AtomicU64::new(0),
            funding_added: AtomicU64::new(0),
            funding_removed: AtomicU64::new(0),
            buys: AtomicU64::new(0),
            sells: AtomicU64::new(0),
            claims: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            total_cycle_time_ns: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    const fn event_counter(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::FundingAdded => &self.funding_added,
            EventKind::FundingRemoved => &self.funding_removed,
            EventKind::Buy => &self.buys,
            EventKind::Sell => &self.sells,
            EventKind::Claim => &self.claims,
        }
    }

    /// Records one applied event.
    pub fn record_event(&self, kind: EventKind) {
        self.event_counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    /// Records a committed cycle.
    pub fn record_commit(&self, duration: Duration) {
        self.cycles_committed.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_cycle_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Records a cycle with nothing to do.
    pub fn record_idle(&self) {
        self.cycles_idle.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rollback.
    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transient error.
    pub fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fatal error.
    pub fn record_fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of committed cycles.
    #[must_use]
    pub fn cycles_committed(&self) -> u64 {
        self.cycles_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of idle cycles.
    #[must_use]
    pub fn cycles_idle(&self) -> u64 {
        self.cycles_idle.load(Ordering::Relaxed)
    }

    /// Returns the number of events applied of a kind.
    #[must_use]
    pub fn events(&self, kind: EventKind) -> u64 {
        self.event_counter(kind).load(Ordering::Relaxed)
    }

    /// Returns the total number of events applied.
    #[must_use]
    pub fn events_processed(&self) -> u64 {
        EventKind::ALL.into_iter().map(|k| self.events(k)).sum()
    }

    /// Returns the number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns the number of transient errors.
    #[must_use]
    pub fn transient_errors(&self) -> u64 {
        self.transient_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of fatal errors.
    #[must_use]
    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors.load(Ordering::Relaxed)
    }

    /// Returns the average duration of a committed cycle.
    #[must_use]
    pub fn average_cycle_time(&self) -> Duration {
        let count = self.cycles_committed();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_cycle_time_ns.load(Ordering::Relaxed) / count)
    }

    /// Returns the events per second since start.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn events_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.events_processed() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> IndexerMetricsSnapshot {
        IndexerMetricsSnapshot {
            cycles_committed: self.cycles_committed(),
            cycles_idle: self.cycles_idle(),
            events_processed: self.events_processed(),
            funding_added: self.events(EventKind::FundingAdded),
            funding_removed: self.events(EventKind::FundingRemoved),
            buys: self.events(EventKind::Buy),
            sells: self.events(EventKind::Sell),
            claims: self.events(EventKind::Claim),
            rollbacks: self.rollbacks(),
            transient_errors: self.transient_errors(),
            fatal_errors: self.fatal_errors(),
            average_cycle_time: self.average_cycle_time(),
            events_per_second: self.events_per_second(),
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.cycles_committed,
            &self.cycles_idle,
            &self.funding_added,
            &self.funding_removed,
            &self.buys,
            &self.sells,
            &self.claims,
            &self.rollbacks,
            &self.transient_errors,
            &self.fatal_errors,
            &self.total_cycle_time_ns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of indexer metrics.
#[derive(Debug, Clone)]
pub struct IndexerMetricsSnapshot {
    /// Committed cycles.
    pub cycles_committed: u64,
    /// Idle cycles.
    pub cycles_idle: u64,
    /// Events applied.
    pub events_processed: u64,
    /// Funding adds.
    pub funding_added: u64,
    /// Funding removals.
    pub funding_removed: u64,
    /// Buys.
    pub buys: u64,
    /// Sells.
    pub sells: u64,
    /// Claims.
    pub claims: u64,
    /// Rollbacks.
    pub rollbacks: u64,
    /// Transient errors.
    pub transient_errors: u64,
    /// Fatal errors.
    pub fatal_errors: u64,
    /// Average committed cycle time.
    pub average_cycle_time: Duration,
    /// Events per second.
    pub events_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = IndexerMetrics::new();
        assert_eq!(metrics.cycles_committed(), 0);
        assert_eq!(metrics.events_processed(), 0);
        assert_eq!(metrics.rollbacks(), 0);
        assert_eq!(metrics.average_cycle_time(), Duration::ZERO);
    }

    #[test]
    fn test_metrics_record_events_by_kind() {
        let metrics = IndexerMetrics::default();
        metrics.record_event(EventKind::FundingAdded);
        metrics.record_event(EventKind::FundingAdded);
        metrics.record_event(EventKind::Sell);

        assert_eq!(metrics.events(EventKind::FundingAdded), 2);
        assert_eq!(metrics.events(EventKind::Sell), 1);
        assert_eq!(metrics.events(EventKind::Buy), 0);
        assert_eq!(metrics.events_processed(), 3);
    }

    #[test]
    fn test_metrics_cycles() {
        let metrics = IndexerMetrics::new();
        metrics.record_commit(Duration::from_millis(4));
        metrics.record_commit(Duration::from_millis(2));
        metrics.record_idle();

        assert_eq!(metrics.cycles_committed(), 2);
        assert_eq!(metrics.cycles_idle(), 1);
        assert_eq!(metrics.average_cycle_time(), Duration::from_millis(3));
    }

    #[test]
    fn test_metrics_errors() {
        let metrics = IndexerMetrics::new();
        metrics.record_rollback();
        metrics.record_transient_error();
        metrics.record_transient_error();
        metrics.record_fatal_error();

        assert_eq!(metrics.rollbacks(), 1);
        assert_eq!(metrics.transient_errors(), 2);
        assert_eq!(metrics.fatal_errors(), 1);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = IndexerMetrics::new();
        metrics.record_event(EventKind::Claim);
        metrics.record_idle();
        metrics.record_rollback();

        metrics.reset();

        assert_eq!(metrics.events_processed(), 0);
        assert_eq!(metrics.cycles_idle(), 0);
        assert_eq!(metrics.rollbacks(), 0);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = IndexerMetrics::new();
        metrics.record_event(EventKind::Buy);
        metrics.record_event(EventKind::Claim);
        metrics.record_idle();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.buys, 1);
        assert_eq!(snapshot.claims, 1);
        assert_eq!(snapshot.cycles_idle, 1);
    }
}
