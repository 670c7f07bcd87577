//! Job records and run outcomes.
//!
//! A job row guards a singleton background task across worker instances.
//! `ACTIVE` with zero executors means free; acquisition moves it to
//! `LOCKED` with one executor and stamps `last_run`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lock timeout used when a row carries none.
pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 900;

/// Lock state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Free to acquire.
    Active,
    /// Held by an executor.
    Locked,
}

impl JobStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Locked => "LOCKED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "LOCKED" => Ok(Self::Locked),
            other => Err(format!("unknown job status {other}")),
        }
    }
}

/// Identifies a job row by id or unique name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// Primary key.
    Id(i64),
    /// Unique name.
    Name(String),
}

impl JobKey {
    /// Creates a key from a job name.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Returns true if `job` is the row this key selects.
    #[must_use]
    pub fn matches(&self, job: &JobRecord) -> bool {
        match self {
            Self::Id(id) => job.id == *id,
            Self::Name(name) => job.name == *name,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// A `job` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Primary key.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Lock state.
    pub status: JobStatus,
    /// Number of executors holding the job.
    pub executor_count: i32,
    /// When the job was last acquired.
    pub last_run: Option<DateTime<Utc>>,
    /// Age after which a held lock counts as stale.
    pub timeout_seconds: i64,
    /// Task-specific configuration.
    pub config: serde_json::Value,
}

impl JobRecord {
    /// Creates a free job with the default timeout.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Active,
            executor_count: 0,
            last_run: None,
            timeout_seconds: DEFAULT_JOB_TIMEOUT_SECS,
            config: serde_json::Value::Null,
        }
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: i64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Marks the job as held since `last_run`.
    #[must_use]
    pub fn locked_since(mut self, last_run: DateTime<Utc>) -> Self {
        self.status = JobStatus::Locked;
        self.executor_count = 1;
        self.last_run = Some(last_run);
        self
    }

    /// Returns true if an acquisition may take the job.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.executor_count < 1 && self.status == JobStatus::Active
    }

    /// Lock timeout, falling back to `default_secs` when the row has none.
    #[must_use]
    pub fn timeout_or(&self, default_secs: i64) -> Duration {
        let secs = if self.timeout_seconds > 0 {
            self.timeout_seconds
        } else {
            default_secs
        };
        Duration::seconds(secs)
    }

    /// Time since the last acquisition.
    #[must_use]
    pub fn elapsed_since_run(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_run.map(|last| now - last)
    }

    /// Returns true if the held lock is older than its timeout.
    ///
    /// A held job without `last_run` is stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, default_timeout_secs: i64) -> bool {
        match self.elapsed_since_run(now) {
            Some(elapsed) => elapsed > self.timeout_or(default_timeout_secs),
            None => true,
        }
    }
}

/// Alert raised by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobAlertKind {
    /// The job row does not exist.
    MissingJobDefinition,
    /// The job is held past its timeout.
    JobLockTimeout,
}

impl JobAlertKind {
    /// Alert code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingJobDefinition => "MISSING_JOB_DEFINITION",
            Self::JobLockTimeout => "JOB_LOCK_TIMEOUT",
        }
    }
}

impl fmt::Display for JobAlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert about one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobAlert {
    /// Alert code.
    pub kind: JobAlertKind,
    /// Job the alert is about.
    pub job: JobKey,
    /// Time since the last acquisition, for lock timeouts.
    pub elapsed: Option<Duration>,
}

impl JobAlert {
    /// Human-readable alert text.
    #[must_use]
    pub fn message(&self) -> String {
        match (self.kind, self.elapsed) {
            (JobAlertKind::MissingJobDefinition, _) => {
                format!("{}: no job row for {}", self.kind, self.job)
            }
            (JobAlertKind::JobLockTimeout, Some(elapsed)) => format!(
                "{}: job {} locked for {}s",
                self.kind,
                self.job,
                elapsed.num_seconds()
            ),
            (JobAlertKind::JobLockTimeout, None) => {
                format!("{}: job {} locked with no last run", self.kind, self.job)
            }
        }
    }
}

/// Why a run was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The job row does not exist.
    MissingDefinition,
    /// Another executor holds the job.
    Contended {
        /// Whether the held lock is past its timeout.
        stale: bool,
    },
}

/// Outcome of one singleton run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun {
    /// The task body succeeded.
    Completed,
    /// The task body failed or panicked.
    Failed(String),
    /// The task body did not run.
    Skipped(SkipReason),
}

impl JobRun {
    /// Returns true if the task body ran.
    #[must_use]
    pub const fn ran(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_names() {
        assert_eq!("locked".parse::<JobStatus>(), Ok(JobStatus::Locked));
        assert_eq!(JobStatus::Active.to_string(), "ACTIVE");
        assert!("PAUSED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_available() {
        let job = JobRecord::new(1, "refresh-prices");
        assert!(job.is_available());
        assert_eq!(job.timeout_seconds, DEFAULT_JOB_TIMEOUT_SECS);
    }

    #[test]
    fn test_locked_job_is_not_available() {
        let job = JobRecord::new(1, "refresh-prices").locked_since(Utc::now());
        assert!(!job.is_available());

        let mut counted = JobRecord::new(2, "other");
        counted.executor_count = 1;
        assert!(!counted.is_available());
    }

    #[test]
    fn test_staleness_uses_timeout() {
        let now = Utc::now();
        let job = JobRecord::new(1, "refresh-prices").locked_since(now - Duration::minutes(20));
        assert!(job.is_stale(now, DEFAULT_JOB_TIMEOUT_SECS));

        let fresh = JobRecord::new(1, "refresh-prices").locked_since(now - Duration::minutes(5));
        assert!(!fresh.is_stale(now, DEFAULT_JOB_TIMEOUT_SECS));

        let exact = JobRecord::new(1, "refresh-prices").locked_since(now - Duration::minutes(15));
        assert!(!exact.is_stale(now, DEFAULT_JOB_TIMEOUT_SECS));
    }

    #[test]
    fn test_missing_last_run_is_stale() {
        let mut job = JobRecord::new(1, "refresh-prices");
        job.status = JobStatus::Locked;
        assert!(job.is_stale(Utc::now(), DEFAULT_JOB_TIMEOUT_SECS));
    }

    #[test]
    fn test_zero_timeout_falls_back() {
        let job = JobRecord::new(1, "x").with_timeout_seconds(0);
        assert_eq!(job.timeout_or(60), Duration::seconds(60));
    }

    #[test]
    fn test_key_matches() {
        let job = JobRecord::new(4, "refresh-prices");
        assert!(JobKey::Id(4).matches(&job));
        assert!(JobKey::name("refresh-prices").matches(&job));
        assert!(!JobKey::name("other").matches(&job));
    }

    #[test]
    fn test_alert_message() {
        let alert = JobAlert {
            kind: JobAlertKind::JobLockTimeout,
            job: JobKey::name("refresh-prices"),
            elapsed: Some(Duration::minutes(20)),
        };
        assert_eq!(
            alert.message(),
            "JOB_LOCK_TIMEOUT: job refresh-prices locked for 1200s"
        );
    }
}
