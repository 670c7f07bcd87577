//! Main scheduler service.
//!
//! Each tick runs every configured singleton job through the lock manager,
//! then one pass of every fan-out task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::config::{ConfigError, SchedulerConfig};
use super::fanout::{FanOutPass, FanOutReport, FanOutWorker};
use super::job::{JobKey, JobRun};
use super::lock::{JobLockManager, SingletonTask};
use super::metrics::JobMetrics;

/// Results of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Singleton runs, by job name.
    pub jobs: Vec<(String, JobRun)>,
    /// Fan-out passes, by task name.
    pub fanout: Vec<(String, FanOutReport)>,
}

/// The scheduler service.
pub struct SchedulerService {
    /// Configuration.
    config: SchedulerConfig,

    /// Singleton job guard.
    locks: JobLockManager,

    /// Fan-out executor.
    worker: FanOutWorker,

    /// Singleton tasks.
    singletons: Vec<Arc<dyn SingletonTask>>,

    /// Fan-out tasks.
    fanouts: Vec<Arc<dyn FanOutPass>>,

    /// Metrics.
    metrics: Arc<JobMetrics>,

    /// Whether the service is running.
    running: AtomicBool,
}

impl SchedulerService {
    /// Creates a new scheduler service.
    ///
    /// The lock manager and fan-out worker are re-pointed at the service's
    /// metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SchedulerConfig, locks: JobLockManager) -> Result<Self, ConfigError> {
        config.validate()?;
        let metrics = Arc::new(JobMetrics::new());

        Ok(Self {
            locks: locks
                .with_metrics(Arc::clone(&metrics))
                .with_default_timeout(config.job_timeout_secs),
            worker: FanOutWorker::new(config.fanout_concurrency).with_metrics(Arc::clone(&metrics)),
            config,
            singletons: Vec::new(),
            fanouts: Vec::new(),
            metrics,
            running: AtomicBool::new(false),
        })
    }

    /// Adds a singleton task. Tasks whose job is not enabled in the
    /// configuration are ignored.
    #[must_use]
    pub fn with_singleton(mut self, task: Arc<dyn SingletonTask>) -> Self {
        if self.config.runs_job(task.name()) {
            self.singletons.push(task);
        } else {
            debug!(job = task.name(), "Job not enabled on this worker");
        }
        self
    }

    /// Adds a fan-out task.
    #[must_use]
    pub fn with_fanout(mut self, task: Arc<dyn FanOutPass>) -> Self {
        self.fanouts.push(task);
        self
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<JobMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns true if the service is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops the service after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("Scheduler service stop requested");
    }

    /// Runs ticks until stopped.
    pub async fn run(&self) {
        self.running.store(true, Ordering::Relaxed);
        info!(
            jobs = self.singletons.len(),
            fanouts = self.fanouts.len(),
            "Scheduler service started"
        );

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let step = poll_interval.min(Duration::from_millis(100));

        while self.is_running() {
            self.poll_once().await;

            // Sleep in short steps so a stop is seen within one step.
            let mut slept = Duration::ZERO;
            while slept < poll_interval && self.is_running() {
                tokio::time::sleep(step).await;
                slept += step;
            }
        }

        info!("Scheduler service stopped");
    }

    /// Runs a single tick.
    pub async fn poll_once(&self) -> TickReport {
        self.metrics.record_tick();
        let mut report = TickReport::default();

        for task in &self.singletons {
            let name = task.name().to_string();
            match self
                .locks
                .run_singleton_job(&JobKey::name(name.clone()), Arc::clone(task))
                .await
            {
                Ok(run) => report.jobs.push((name, run)),
                Err(err) => {
                    warn!(job = %name, error = %err, transient = err.is_transient(), "Job acquisition failed");
                }
            }
        }

        for task in &self.fanouts {
            match task.run_pass(&self.worker).await {
                Ok(pass) => report.fanout.push((task.pass_name().to_string(), pass)),
                Err(err) => {
                    warn!(task = task.pass_name(), error = %err, "Fan-out planning failed");
                }
            }
        }

        report
    }
}
