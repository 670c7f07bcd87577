//! Scheduler service configuration.
//!
//! Provides configuration options for the scheduler service.

use marketsync_indexer::config::{parse_or, require};
use serde::{Deserialize, Serialize};

use crate::fanout::DEFAULT_FANOUT_CONCURRENCY;
use crate::job::DEFAULT_JOB_TIMEOUT_SECS;
use crate::tasks::chances::DEFAULT_BATCH_SIZE;
use crate::tasks::REFRESH_PRICES_JOB;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Fan-out items processed at once.
    pub fanout_concurrency: usize,

    /// Work items claimed per fan-out pass.
    pub fanout_batch_size: usize,

    /// Lock timeout for job rows without one, in seconds.
    pub job_timeout_secs: i64,

    /// Names of the singleton jobs this worker runs.
    pub jobs: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
            fanout_batch_size: DEFAULT_BATCH_SIZE,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            jobs: vec![REFRESH_PRICES_JOB.to_string()],
        }
    }
}

impl SchedulerConfig {
    /// Sets the tick interval.
    #[must_use]
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the fan-out concurrency.
    #[must_use]
    pub fn with_fanout_concurrency(mut self, concurrency: usize) -> Self {
        self.fanout_concurrency = concurrency;
        self
    }

    /// Sets the enabled singleton jobs.
    #[must_use]
    pub fn with_jobs(mut self, jobs: Vec<String>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Returns true if the named job is enabled.
    #[must_use]
    pub fn runs_job(&self, name: &str) -> bool {
        self.jobs.iter().any(|job| job == name)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.fanout_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.fanout_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.job_timeout_secs <= 0 {
            return Err(ConfigError::InvalidJobTimeout);
        }
        Ok(())
    }
}

/// Process-level configuration of the scheduler binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerServiceConfig {
    /// Postgres connection string.
    pub database_url: String,

    /// Pool size.
    pub max_connections: u32,

    /// Webhook receiving operator alerts. Alerts are only logged when unset.
    pub alert_webhook_url: Option<String>,

    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl SchedulerServiceConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SchedulerConfig::default();
        let jobs = lookup("SCHEDULER_JOBS").map_or(defaults.jobs.clone(), |value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        });

        let config = Self {
            database_url: require(&lookup, "DATABASE_URL")?,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            alert_webhook_url: lookup("ALERT_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            scheduler: SchedulerConfig {
                poll_interval_ms: parse_or(&lookup, "SCHEDULER_POLL_MS", defaults.poll_interval_ms)?,
                fanout_concurrency: parse_or(
                    &lookup,
                    "FANOUT_CONCURRENCY",
                    defaults.fanout_concurrency,
                )?,
                fanout_batch_size: parse_or(
                    &lookup,
                    "FANOUT_BATCH_SIZE",
                    defaults.fanout_batch_size,
                )?,
                job_timeout_secs: parse_or(&lookup, "JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
                jobs,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any setting is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(ConfigError::Env(
                marketsync_indexer::ConfigError::InvalidDatabaseUrl,
            ));
        }
        self.scheduler.validate()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Environment or shared settings error.
    #[error(transparent)]
    Env(#[from] marketsync_indexer::ConfigError),

    /// Invalid poll interval.
    #[error("poll interval must be > 0")]
    InvalidPollInterval,

    /// Invalid fan-out concurrency.
    #[error("fanout_concurrency must be > 0")]
    InvalidConcurrency,

    /// Invalid fan-out batch size.
    #[error("fanout_batch_size must be > 0")]
    InvalidBatchSize,

    /// Invalid job timeout.
    #[error("job_timeout_secs must be > 0")]
    InvalidJobTimeout,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_ms, 60_000);
        assert_eq!(config.job_timeout_secs, 900);
        assert!(config.runs_job("refresh-prices"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default()
            .with_poll_interval(500)
            .with_fanout_concurrency(2)
            .with_jobs(Vec::new());
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.fanout_concurrency, 2);
        assert!(!config.runs_job("refresh-prices"));
    }

    #[test]
    fn test_validate_zero_values() {
        assert!(matches!(
            SchedulerConfig::default().with_poll_interval(0).validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
        assert!(matches!(
            SchedulerConfig::default().with_fanout_concurrency(0).validate(),
            Err(ConfigError::InvalidConcurrency)
        ));
        let config = SchedulerConfig {
            job_timeout_secs: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidJobTimeout)));
    }

    #[test]
    fn test_from_lookup() {
        let config = SchedulerServiceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/marketsync"),
            ("SCHEDULER_POLL_MS", "1500"),
            ("FANOUT_CONCURRENCY", "3"),
            ("JOB_TIMEOUT_SECS", "120"),
            ("SCHEDULER_JOBS", "refresh-prices, nightly-report"),
        ]))
        .expect("config");

        assert_eq!(config.scheduler.poll_interval_ms, 1_500);
        assert_eq!(config.scheduler.fanout_concurrency, 3);
        assert_eq!(config.scheduler.job_timeout_secs, 120);
        assert_eq!(config.scheduler.jobs, vec!["refresh-prices", "nightly-report"]);
        assert_eq!(config.max_connections, 5);
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn test_from_lookup_missing_database() {
        let err = SchedulerServiceConfig::from_lookup(lookup(&[])).expect_err("missing");
        assert!(matches!(
            err,
            ConfigError::Env(marketsync_indexer::ConfigError::MissingVar(ref name)) if name == "DATABASE_URL"
        ));
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let err = SchedulerServiceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/marketsync"),
            ("FANOUT_CONCURRENCY", "many"),
        ]))
        .expect_err("invalid");
        assert!(matches!(
            err,
            ConfigError::Env(marketsync_indexer::ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_from_lookup_rejects_non_postgres_url() {
        let result = SchedulerServiceConfig::from_lookup(lookup(&[("DATABASE_URL", "mysql://db")]));
        assert!(result.is_err());
    }
}
