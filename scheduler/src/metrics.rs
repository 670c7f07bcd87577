//! Scheduler metrics.
//!
//! Provides atomic counters for lock acquisitions, job runs and fan-out
//! items.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for the scheduler service.
#[derive(Debug)]
pub struct JobMetrics {
    /// Successful acquisitions.
    acquired: AtomicU64,

    /// Acquisitions that found the job held.
    contended: AtomicU64,

    /// Acquisitions that found no job row.
    missing: AtomicU64,

    /// Lock timeout alerts raised.
    stale_alerts: AtomicU64,

    /// Task bodies that succeeded.
    completed: AtomicU64,

    /// Task bodies that failed or panicked.
    failed: AtomicU64,

    /// Releases that could not be committed.
    release_failures: AtomicU64,

    /// Fan-out items processed.
    items_succeeded: AtomicU64,

    /// Fan-out items that failed.
    items_failed: AtomicU64,

    /// Scheduler ticks.
    ticks: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl JobMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            acquired: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            missing: AtomicU64::new(0),
            stale_alerts: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
            items_succeeded: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a successful acquisition.
    pub fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an acquisition that found the job held.
    pub fn record_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an acquisition that found no job row.
    pub fn record_missing(&self) {
        self.missing.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lock timeout alert.
    pub fn record_stale_alert(&self) {
        self.stale_alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful task body.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed task body.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed release.
    pub fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one fan-out pass.
    pub fn record_items(&self, succeeded: u64, failed: u64) {
        self.items_succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.items_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Records a scheduler tick.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns successful acquisitions.
    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Returns contended acquisitions.
    #[must_use]
    pub fn contended(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    /// Returns acquisitions without a job row.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.missing.load(Ordering::Relaxed)
    }

    /// Returns lock timeout alerts.
    #[must_use]
    pub fn stale_alerts(&self) -> u64 {
        self.stale_alerts.load(Ordering::Relaxed)
    }

    /// Returns successful task bodies.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Returns failed task bodies.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns failed releases.
    #[must_use]
    pub fn release_failures(&self) -> u64 {
        self.release_failures.load(Ordering::Relaxed)
    }

    /// Returns processed fan-out items.
    #[must_use]
    pub fn items_succeeded(&self) -> u64 {
        self.items_succeeded.load(Ordering::Relaxed)
    }

    /// Returns failed fan-out items.
    #[must_use]
    pub fn items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    /// Returns scheduler ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the share of task bodies that succeeded (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let ran = self.completed() + self.failed();
        if ran > 0 {
            self.completed() as f64 / ran as f64
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> JobMetricsSnapshot {
        JobMetricsSnapshot {
            acquired: self.acquired(),
            contended: self.contended(),
            missing: self.missing(),
            stale_alerts: self.stale_alerts(),
            completed: self.completed(),
            failed: self.failed(),
            release_failures: self.release_failures(),
            items_succeeded: self.items_succeeded(),
            items_failed: self.items_failed(),
            ticks: self.ticks(),
            uptime: self.uptime(),
            success_rate: self.success_rate(),
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        self.acquired.store(0, Ordering::Relaxed);
        self.contended.store(0, Ordering::Relaxed);
        self.missing.store(0, Ordering::Relaxed);
        self.stale_alerts.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.release_failures.store(0, Ordering::Relaxed);
        self.items_succeeded.store(0, Ordering::Relaxed);
        self.items_failed.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of scheduler metrics.
#[derive(Debug, Clone)]
pub struct JobMetricsSnapshot {
    /// Successful acquisitions.
    pub acquired: u64,
    /// Contended acquisitions.
    pub contended: u64,
    /// Acquisitions without a job row.
    pub missing: u64,
    /// Lock timeout alerts.
    pub stale_alerts: u64,
    /// Successful task bodies.
    pub completed: u64,
    /// Failed task bodies.
    pub failed: u64,
    /// Failed releases.
    pub release_failures: u64,
    /// Processed fan-out items.
    pub items_succeeded: u64,
    /// Failed fan-out items.
    pub items_failed: u64,
    /// Scheduler ticks.
    pub ticks: u64,
    /// Uptime.
    pub uptime: Duration,
    /// Success rate.
    pub success_rate: f64,
}
