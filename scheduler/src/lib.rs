//! Marketsync Scheduler - Singleton jobs and fan-out workers.
//!
//! This crate runs background work next to the indexer. Singleton jobs are
//! guarded by a `job` row so that at most one worker instance executes them
//! at a time; fan-out tasks split their work into independent items that
//! any number of workers may process concurrently.
//!
//! # Components
//!
//! - [`config`]: Scheduler configuration
//! - [`job`]: Job rows, alerts and run outcomes
//! - [`store`]: Job row persistence
//! - [`lock`]: The job lock manager
//! - [`fanout`]: Fan-out execution
//! - [`tasks`]: Concrete tasks
//! - [`service`]: Main scheduler service
//! - [`metrics`]: Scheduler metrics

pub mod config;
pub mod error;
pub mod fanout;
pub mod job;
pub mod lock;
pub mod metrics;
pub mod service;
pub mod store;
pub mod tasks;

pub use config::{SchedulerConfig, SchedulerServiceConfig};
pub use error::JobError;
pub use fanout::{FanOutPass, FanOutReport, FanOutTask, FanOutWorker};
pub use job::{JobAlert, JobAlertKind, JobKey, JobRecord, JobRun, JobStatus, SkipReason};
pub use lock::{Acquisition, JobLockManager, SingletonTask};
pub use metrics::JobMetrics;
pub use service::{SchedulerService, TickReport};
pub use store::{JobStore, MemoryJobStore, PgJobStore};
pub use tasks::{ChanceRecomputeWorker, RefreshPricesTask};
