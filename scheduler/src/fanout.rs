//! Fan-out workers.
//!
//! A fan-out task plans a batch of independent items and processes each one
//! on its own, with no shared cursor, so many items run concurrently. One
//! failed item never affects the others.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::metrics::JobMetrics;

/// Default number of items processed at once.
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 8;

/// A task made of independent work items.
#[async_trait]
pub trait FanOutTask: Send + Sync {
    /// One unit of work.
    type Item: Debug + Send + Sync;

    /// Task name for logs.
    fn name(&self) -> &str;

    /// Enumerates the items of this pass.
    async fn plan(&self) -> Result<Vec<Self::Item>, JobError>;

    /// Processes exactly one item.
    async fn execute(&self, item: &Self::Item) -> anyhow::Result<()>;

    /// Called after `execute` failed for `item`.
    async fn on_failure(&self, _item: &Self::Item, _error: &anyhow::Error) {}
}

/// Counts of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Items planned.
    pub planned: usize,
    /// Items processed.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
}

/// Runs fan-out passes with bounded concurrency.
#[derive(Debug, Clone)]
pub struct FanOutWorker {
    concurrency: usize,
    metrics: Arc<JobMetrics>,
}

impl Default for FanOutWorker {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_CONCURRENCY)
    }
}

impl FanOutWorker {
    /// Creates a worker. A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            metrics: Arc::new(JobMetrics::new()),
        }
    }

    /// Shares a metrics instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Plans and processes one batch of `task`.
    ///
    /// # Errors
    ///
    /// Returns an error only if planning fails. Item failures are counted in
    /// the report.
    pub async fn run<T>(&self, task: &T) -> Result<FanOutReport, JobError>
    where
        T: FanOutTask + ?Sized,
    {
        let items = task.plan().await?;
        if items.is_empty() {
            debug!(task = task.name(), "Nothing to fan out");
            return Ok(FanOutReport::default());
        }

        // Futures are lazy; buffer_unordered bounds how many run at once.
        let pending: Vec<_> = items.iter().map(|item| run_item(task, item)).collect();
        let outcomes: Vec<bool> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = FanOutReport {
            planned: items.len(),
            succeeded,
            failed: items.len() - succeeded,
        };
        self.metrics
            .record_items(report.succeeded as u64, report.failed as u64);
        info!(
            task = task.name(),
            planned = report.planned,
            succeeded = report.succeeded,
            failed = report.failed,
            "Fan-out pass finished"
        );
        Ok(report)
    }
}

/// Processes one item, returning whether it succeeded.
async fn run_item<T>(task: &T, item: &T::Item) -> bool
where
    T: FanOutTask + ?Sized,
{
    match task.execute(item).await {
        Ok(()) => true,
        Err(err) => {
            warn!(task = task.name(), item = ?item, error = %format!("{err:#}"), "Fan-out item failed");
            task.on_failure(item, &err).await;
            false
        }
    }
}

/// Object-safe view of a fan-out task, so a service can hold several.
#[async_trait]
pub trait FanOutPass: Send + Sync {
    /// Task name for logs.
    fn pass_name(&self) -> &str;

    /// Runs one pass on `worker`.
    async fn run_pass(&self, worker: &FanOutWorker) -> Result<FanOutReport, JobError>;
}

#[async_trait]
impl<T> FanOutPass for T
where
    T: FanOutTask,
{
    fn pass_name(&self) -> &str {
        self.name()
    }

    async fn run_pass(&self, worker: &FanOutWorker) -> Result<FanOutReport, JobError> {
        worker.run(self).await
    }
}
