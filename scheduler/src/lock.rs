//! Job lock manager.
//!
//! Guards singleton tasks with the `job` row: `ACTIVE --acquire--> LOCKED
//! --release--> ACTIVE`. Acquisition and release are separate short
//! transactions around the task body, so the row lock is never held while
//! the task runs. This is advisory exclusion, not a lease: a holder that
//! dies leaves the row `LOCKED` until an operator resets it, prompted by the
//! lock timeout alert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use marketsync_indexer::alerts::{notify_best_effort, AlertChannel, AlertSink, TracingAlertSink};
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::job::{
    JobAlert, JobAlertKind, JobKey, JobRecord, JobRun, JobStatus, SkipReason,
    DEFAULT_JOB_TIMEOUT_SECS,
};
use crate::metrics::JobMetrics;
use crate::store::JobStore;

/// A task that must run on at most one worker at a time.
#[async_trait]
pub trait SingletonTask: Send + Sync + 'static {
    /// Unique job name; also the `job.name` the task is guarded by.
    fn name(&self) -> &str;

    /// Runs the task body.
    async fn run(&self, job: JobRecord) -> anyhow::Result<()>;

    /// Receives lock manager alerts about this task's job.
    ///
    /// `job` is the row as read when the alert was raised, and `None` only
    /// when the row does not exist.
    async fn on_alert(&self, job: Option<&JobRecord>, alert: &JobAlert) {
        warn!(
            job = self.name(),
            alert = %alert.kind,
            last_run = ?job.and_then(|j| j.last_run),
            "{}",
            alert.message()
        );
    }
}

/// Result of one acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// The job moved to `LOCKED`; holds the updated row.
    Acquired(JobRecord),
    /// No job row exists.
    Missing,
    /// Another executor holds the job. Nothing was changed.
    Contended {
        /// The row as read.
        job: JobRecord,
        /// Whether the held lock is past its timeout.
        stale: bool,
        /// Time since the last acquisition.
        elapsed: Option<Duration>,
    },
}

/// Acquires and releases job rows around singleton task bodies.
pub struct JobLockManager {
    store: Arc<dyn JobStore>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<JobMetrics>,
    default_timeout_secs: i64,
}

impl JobLockManager {
    /// Creates a manager that alerts through the log only.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            alerts: Arc::new(TracingAlertSink),
            metrics: Arc::new(JobMetrics::new()),
            default_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
        }
    }

    /// Sets the operator alert sink.
    #[must_use]
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Shares a metrics instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the timeout used for rows without one.
    #[must_use]
    pub const fn with_default_timeout(mut self, seconds: i64) -> Self {
        self.default_timeout_secs = seconds;
        self
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<JobMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Tries to take the job.
    ///
    /// Locks the row, and only if it exists, has no executor and is
    /// `ACTIVE`, moves it to `LOCKED` with one executor and `last_run = now`.
    /// Any other outcome leaves the row untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn acquire(&self, key: &JobKey) -> Result<Acquisition, JobError> {
        let mut tx = self.store.begin().await?;

        let job = match tx.lock_job(key).await {
            Ok(job) => job,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(job = %key, error = %rollback, "Rollback after failed lock");
                }
                return Err(err);
            }
        };

        let Some(mut job) = job else {
            tx.rollback().await?;
            self.metrics.record_missing();
            return Ok(Acquisition::Missing);
        };

        if !job.is_available() {
            tx.rollback().await?;
            let now = Utc::now();
            self.metrics.record_contended();
            return Ok(Acquisition::Contended {
                stale: job.is_stale(now, self.default_timeout_secs),
                elapsed: job.elapsed_since_run(now),
                job,
            });
        }

        job.executor_count += 1;
        job.status = JobStatus::Locked;
        job.last_run = Some(Utc::now());

        if let Err(err) = tx.save_job(&job).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(job = %key, error = %rollback, "Rollback after failed save");
            }
            return Err(err);
        }
        tx.commit().await?;

        self.metrics.record_acquired();
        debug!(job = %job.name, "Job lock acquired");
        Ok(Acquisition::Acquired(job))
    }

    /// Gives the job back.
    ///
    /// Decrements the executor count, never below zero, and resets a
    /// `LOCKED` row to `ACTIVE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is gone or the transaction fails.
    pub async fn release(&self, job_id: i64) -> Result<JobRecord, JobError> {
        let key = JobKey::Id(job_id);
        let mut tx = self.store.begin().await?;

        let job = match tx.lock_job(&key).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tx.rollback().await?;
                return Err(JobError::NotFound(key.to_string()));
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(job = %key, error = %rollback, "Rollback after failed lock");
                }
                return Err(err);
            }
        };

        let mut released = job;
        released.executor_count = (released.executor_count - 1).max(0);
        if released.status == JobStatus::Locked {
            released.status = JobStatus::Active;
        }

        if let Err(err) = tx.save_job(&released).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(job = %key, error = %rollback, "Rollback after failed save");
            }
            return Err(err);
        }
        tx.commit().await?;

        debug!(job = %released.name, "Job lock released");
        Ok(released)
    }

    /// Runs `task` if its job can be acquired, then releases the job.
    ///
    /// Task errors and panics end up in [`JobRun::Failed`]; a failed release
    /// is logged and alerted but does not change the returned run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the acquisition itself fails.
    pub async fn run_singleton_job(
        &self,
        key: &JobKey,
        task: Arc<dyn SingletonTask>,
    ) -> Result<JobRun, JobError> {
        let job = match self.acquire(key).await? {
            Acquisition::Acquired(job) => job,
            Acquisition::Missing => {
                let alert = JobAlert {
                    kind: JobAlertKind::MissingJobDefinition,
                    job: key.clone(),
                    elapsed: None,
                };
                self.raise(task.as_ref(), None, &alert).await;
                return Ok(JobRun::Skipped(SkipReason::MissingDefinition));
            }
            Acquisition::Contended {
                job,
                stale,
                elapsed,
            } => {
                if stale {
                    let alert = JobAlert {
                        kind: JobAlertKind::JobLockTimeout,
                        job: key.clone(),
                        elapsed,
                    };
                    self.metrics.record_stale_alert();
                    self.raise(task.as_ref(), Some(&job), &alert).await;
                } else {
                    debug!(job = %key, "Job held by another executor, skipping");
                }
                return Ok(JobRun::Skipped(SkipReason::Contended { stale }));
            }
        };

        let job_id = job.id;
        let run = self.execute(Arc::clone(&task), job).await;

        if let Err(err) = self.release(job_id).await {
            self.metrics.record_release_failure();
            error!(job = %key, error = %err, "Failed to release job lock");
            notify_best_effort(
                self.alerts.as_ref(),
                &format!("job {key} could not be released: {err}"),
                false,
                AlertChannel::Jobs,
            )
            .await;
        }

        Ok(run)
    }

    async fn execute(&self, task: Arc<dyn SingletonTask>, job: JobRecord) -> JobRun {
        let name = job.name.clone();
        info!(job = %name, "Running job");

        let body = tokio::spawn(async move { task.run(job).await });
        match body.await {
            Ok(Ok(())) => {
                self.metrics.record_completed();
                info!(job = %name, "Job completed");
                JobRun::Completed
            }
            Ok(Err(err)) => {
                self.metrics.record_failed();
                warn!(job = %name, error = %format!("{err:#}"), "Job failed");
                JobRun::Failed(format!("{err:#}"))
            }
            Err(join) => {
                self.metrics.record_failed();
                error!(job = %name, error = %join, "Job task aborted");
                JobRun::Failed(join.to_string())
            }
        }
    }

    async fn raise(&self, task: &dyn SingletonTask, job: Option<&JobRecord>, alert: &JobAlert) {
        let message = alert.message();
        error!(job = %alert.job, alert = %alert.kind, "{message}");
        task.on_alert(job, alert).await;
        notify_best_effort(self.alerts.as_ref(), &message, true, AlertChannel::Jobs).await;
    }
}
