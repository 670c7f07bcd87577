//! Indexer service configuration.
//!
//! Provides configuration options for the event indexer, the supervisor and
//! the process as a whole, plus helpers to read them from the environment.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chain::{EventTopics, RpcConfig};

/// Configuration for a single market indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Blocks behind the head considered final.
    pub confirmation_lag: u64,

    /// Window size used when the cursor row has none.
    pub default_window_size: u64,

    /// Sleep between cycles in milliseconds.
    pub sleep_interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            confirmation_lag: 5,
            default_window_size: 1_000,
            sleep_interval_ms: 5_000,
        }
    }
}

impl IndexerConfig {
    /// Sets the confirmation lag.
    #[must_use]
    pub const fn with_confirmation_lag(mut self, blocks: u64) -> Self {
        self.confirmation_lag = blocks;
        self
    }

    /// Sets the default window size.
    #[must_use]
    pub const fn with_default_window_size(mut self, blocks: u64) -> Self {
        self.default_window_size = blocks;
        self
    }

    /// Sets the sleep interval.
    #[must_use]
    pub const fn with_sleep_interval(mut self, ms: u64) -> Self {
        self.sleep_interval_ms = ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.default_window_size == 0 {
            return Err(ConfigError::InvalidWindowSize);
        }
        if self.sleep_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

/// Configuration for the process supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Planning interval in milliseconds.
    pub plan_interval_ms: u64,

    /// Delay before the first restart of a crashed indexer. Zero restarts
    /// immediately.
    pub restart_backoff_initial_ms: u64,

    /// Upper bound for the restart delay.
    pub restart_backoff_max_ms: u64,

    /// Growth factor of the restart delay per consecutive crash.
    pub backoff_multiplier: f64,

    /// Uptime after which a crash streak is forgotten.
    pub crash_reset_after_ms: u64,

    /// How long shutdown waits for indexers to stop.
    pub shutdown_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            plan_interval_ms: 10_000,
            restart_backoff_initial_ms: 1_000,
            restart_backoff_max_ms: 60_000,
            backoff_multiplier: 2.0,
            crash_reset_after_ms: 300_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl SupervisorConfig {
    /// Sets the planning interval.
    #[must_use]
    pub const fn with_plan_interval(mut self, ms: u64) -> Self {
        self.plan_interval_ms = ms;
        self
    }

    /// Sets the restart backoff range.
    #[must_use]
    pub const fn with_restart_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.restart_backoff_initial_ms = initial_ms;
        self.restart_backoff_max_ms = max_ms;
        self
    }

    /// Sets the crash streak reset threshold.
    #[must_use]
    pub const fn with_crash_reset_after(mut self, ms: u64) -> Self {
        self.crash_reset_after_ms = ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plan_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.restart_backoff_initial_ms > self.restart_backoff_max_ms {
            return Err(ConfigError::InvalidBackoffRange);
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier);
        }
        Ok(())
    }
}

/// Configuration for the indexer binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Postgres connection string.
    pub database_url: String,

    /// Maximum pool connections.
    pub max_connections: u32,

    /// Chain RPC client settings.
    pub rpc: RpcConfig,

    /// Per-market indexer settings.
    pub indexer: IndexerConfig,

    /// Supervisor settings.
    pub supervisor: SupervisorConfig,

    /// Webhook receiving alerts. Alerts are only logged when unset.
    pub alert_webhook_url: Option<String>,
}

impl ServiceConfig {
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
        let indexer_defaults = IndexerConfig::default();
        let supervisor_defaults = SupervisorConfig::default();

        let topics = EventTopics {
            funding_added: require(&lookup, "TOPIC_FUNDING_ADDED")?,
            funding_removed: require(&lookup, "TOPIC_FUNDING_REMOVED")?,
            buy: require(&lookup, "TOPIC_BUY")?,
            sell: require(&lookup, "TOPIC_SELL")?,
            claim: require(&lookup, "TOPIC_CLAIM")?,
        };
        let rpc = RpcConfig::new(require(&lookup, "CHAIN_RPC_URL")?)
            .with_topics(topics)
            .with_timeout_ms(parse_or(
                &lookup,
                "CHAIN_RPC_TIMEOUT_MS",
                crate::chain::rpc::DEFAULT_RPC_TIMEOUT_MS,
            )?);

        let config = Self {
            database_url: require(&lookup, "DATABASE_URL")?,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            rpc,
            indexer: IndexerConfig {
                confirmation_lag: parse_or(
                    &lookup,
                    "CONFIRMATION_LAG",
                    indexer_defaults.confirmation_lag,
                )?,
                default_window_size: parse_or(
                    &lookup,
                    "INDEXER_WINDOW_SIZE",
                    indexer_defaults.default_window_size,
                )?,
                sleep_interval_ms: parse_or(
                    &lookup,
                    "INDEXER_SLEEP_MS",
                    indexer_defaults.sleep_interval_ms,
                )?,
            },
            supervisor: SupervisorConfig {
                plan_interval_ms: parse_or(
                    &lookup,
                    "SUPERVISOR_INTERVAL_MS",
                    supervisor_defaults.plan_interval_ms,
                )?,
                restart_backoff_initial_ms: parse_or(
                    &lookup,
                    "RESTART_BACKOFF_INITIAL_MS",
                    supervisor_defaults.restart_backoff_initial_ms,
                )?,
                restart_backoff_max_ms: parse_or(
                    &lookup,
                    "RESTART_BACKOFF_MAX_MS",
                    supervisor_defaults.restart_backoff_max_ms,
                )?,
                ..supervisor_defaults
            },
            alert_webhook_url: lookup("ALERT_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(ConfigError::InvalidDatabaseUrl);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                name: "DATABASE_MAX_CONNECTIONS".to_string(),
                value: "0".to_string(),
            });
        }
        self.rpc
            .validate()
            .map_err(|e| ConfigError::InvalidRpc(e.to_string()))?;
        self.indexer.validate()?;
        self.supervisor.validate()
    }
}

/// Returns a required variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingVar`] if the variable is unset or blank.
pub fn require<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

/// Parses an optional variable, falling back to `default` when unset.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the variable is set but does
/// not parse.
pub fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing environment variable {0}")]
    MissingVar(String),

    /// An environment variable does not parse.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// Invalid database URL.
    #[error("database url must start with postgres:// or postgresql://")]
    InvalidDatabaseUrl,

    /// Invalid chain client settings.
    #[error("invalid rpc configuration: {0}")]
    InvalidRpc(String),

    /// Invalid window size.
    #[error("window size must be > 0")]
    InvalidWindowSize,

    /// Invalid poll interval.
    #[error("poll interval must be > 0")]
    InvalidPollInterval,

    /// Invalid backoff range.
    #[error("restart_backoff_initial_ms must be <= restart_backoff_max_ms")]
    InvalidBackoffRange,

    /// Invalid backoff multiplier.
    #[error("backoff_multiplier must be >= 1.0")]
    InvalidBackoffMultiplier,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DATABASE_URL", "postgres://localhost/marketsync"),
            ("CHAIN_RPC_URL", "https://rpc.example.com"),
            ("TOPIC_FUNDING_ADDED", "0x01"),
            ("TOPIC_FUNDING_REMOVED", "0x02"),
            ("TOPIC_BUY", "0x03"),
            ("TOPIC_SELL", "0x04"),
            ("TOPIC_CLAIM", "0x05"),
        ]
    }

    #[test]
    fn test_indexer_config_default() {
        let config = IndexerConfig::default();
        assert_eq!(config.confirmation_lag, 5);
        assert_eq!(config.sleep_interval_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_indexer_config_builder() {
        let config = IndexerConfig::default()
            .with_confirmation_lag(12)
            .with_default_window_size(50)
            .with_sleep_interval(10);

        assert_eq!(config.confirmation_lag, 12);
        assert_eq!(config.default_window_size, 50);
        assert_eq!(config.sleep_interval_ms, 10);
    }

    #[test]
    fn test_indexer_config_invalid() {
        let config = IndexerConfig::default().with_default_window_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWindowSize)));
    }

    #[test]
    fn test_supervisor_config_validate() {
        assert!(SupervisorConfig::default().validate().is_ok());
        assert!(SupervisorConfig::default()
            .with_restart_backoff(0, 0)
            .validate()
            .is_ok());
        assert!(SupervisorConfig::default()
            .with_restart_backoff(10, 5)
            .validate()
            .is_err());
        let config = SupervisorConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = ServiceConfig::from_lookup(env(&required())).expect("config");
        assert_eq!(config.database_url, "postgres://localhost/marketsync");
        assert_eq!(config.rpc.topics.buy, "0x03");
        assert_eq!(config.indexer.confirmation_lag, 5);
        assert_eq!(config.supervisor.plan_interval_ms, 10_000);
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let mut vars = required();
        vars.extend([
            ("CONFIRMATION_LAG", "12"),
            ("INDEXER_WINDOW_SIZE", "250"),
            ("INDEXER_SLEEP_MS", "1500"),
            ("SUPERVISOR_INTERVAL_MS", "2000"),
            ("RESTART_BACKOFF_INITIAL_MS", "0"),
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/a"),
        ]);
        let config = ServiceConfig::from_lookup(env(&vars)).expect("config");

        assert_eq!(config.indexer.confirmation_lag, 12);
        assert_eq!(config.indexer.default_window_size, 250);
        assert_eq!(config.indexer.sleep_interval_ms, 1500);
        assert_eq!(config.supervisor.plan_interval_ms, 2000);
        assert_eq!(config.supervisor.restart_backoff_initial_ms, 0);
        assert_eq!(
            config.alert_webhook_url.as_deref(),
            Some("https://hooks.example.com/a")
        );
    }

    #[test]
    fn test_from_lookup_missing_var() {
        let vars: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "DATABASE_URL")
            .collect();
        let err = ServiceConfig::from_lookup(env(&vars)).expect_err("missing");
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "DATABASE_URL"));
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let mut vars = required();
        vars.push(("CONFIRMATION_LAG", "five"));
        let err = ServiceConfig::from_lookup(env(&vars)).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidValue { name, .. } if name == "CONFIRMATION_LAG"));
    }

    #[test]
    fn test_from_lookup_invalid_database_url() {
        let mut vars = required();
        vars.retain(|(k, _)| *k != "DATABASE_URL");
        vars.push(("DATABASE_URL", "mysql://localhost/db"));
        assert!(matches!(
            ServiceConfig::from_lookup(env(&vars)),
            Err(ConfigError::InvalidDatabaseUrl)
        ));
    }
}
