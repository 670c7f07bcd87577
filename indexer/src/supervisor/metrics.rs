//! Supervisor metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the process supervisor.
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    plan_cycles: AtomicU64,
    plan_failures: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    restarts: AtomicU64,
    crashes: AtomicU64,
}

impl SupervisorMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed planning cycle.
    pub fn record_plan_cycle(&self) {
        self.plan_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a planning cycle whose desired-set query failed.
    pub fn record_plan_failure(&self) {
        self.plan_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an indexer start.
    pub fn record_start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a requested stop.
    pub fn record_stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a restart after an unsolicited exit.
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unsolicited exit.
    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of planning cycles.
    #[must_use]
    pub fn plan_cycles(&self) -> u64 {
        self.plan_cycles.load(Ordering::Relaxed)
    }

    /// Returns the number of failed planning cycles.
    #[must_use]
    pub fn plan_failures(&self) -> u64 {
        self.plan_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of starts.
    #[must_use]
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Returns the number of stops.
    #[must_use]
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }

    /// Returns the number of restarts.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Returns the number of crashes.
    #[must_use]
    pub fn crashes(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SupervisorMetricsSnapshot {
        SupervisorMetricsSnapshot {
            plan_cycles: self.plan_cycles(),
            plan_failures: self.plan_failures(),
            starts: self.starts(),
            stops: self.stops(),
            restarts: self.restarts(),
            crashes: self.crashes(),
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        self.plan_cycles.store(0, Ordering::Relaxed);
        self.plan_failures.store(0, Ordering::Relaxed);
        self.starts.store(0, Ordering::Relaxed);
        self.stops.store(0, Ordering::Relaxed);
        self.restarts.store(0, Ordering::Relaxed);
        self.crashes.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of supervisor metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorMetricsSnapshot {
    /// Planning cycles.
    pub plan_cycles: u64,
    /// Failed planning cycles.
    pub plan_failures: u64,
    /// Starts.
    pub starts: u64,
    /// Stops.
    pub stops: u64,
    /// Restarts.
    pub restarts: u64,
    /// Crashes.
    pub crashes: u64,
}
