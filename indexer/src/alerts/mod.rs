//! Alerting and audit trail.
//!
//! Alerts page an operator; audit entries are the append-only record of
//! every failure. Both are best-effort: a failing sink is logged and never
//! fails the operation that raised the alert.

pub mod audit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, PgAuditSink, Severity, TracingAuditSink};

/// Default webhook timeout in milliseconds.
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5_000;

/// Where an alert is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    /// Chain indexing failures.
    Indexer,
    /// Supervisor failures.
    Supervisor,
    /// Scheduled job failures.
    Jobs,
}

impl AlertChannel {
    /// Returns the channel name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Indexer => "indexer",
            Self::Supervisor => "supervisor",
            Self::Jobs => "jobs",
        }
    }
}

/// Alert delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// HTTP delivery failed.
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    /// The receiver rejected the alert.
    #[error("alert rejected with HTTP {0}")]
    Rejected(u16),
}

impl From<reqwest::Error> for AlertError {
    fn from(err: reqwest::Error) -> Self {
        Self::Delivery(err.to_string())
    }
}

/// Receives operator alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sends an alert.
    async fn notify(&self, message: &str, urgent: bool, channel: AlertChannel)
        -> Result<(), AlertError>;
}

/// Sends an alert, logging delivery failures instead of returning them.
pub async fn notify_best_effort(
    sink: &dyn AlertSink,
    message: &str,
    urgent: bool,
    channel: AlertChannel,
) {
    if let Err(e) = sink.notify(message, urgent, channel).await {
        tracing::warn!(error = %e, channel = channel.as_str(), "Failed to deliver alert");
    }
}

/// Alert sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(
        &self,
        message: &str,
        urgent: bool,
        channel: AlertChannel,
    ) -> Result<(), AlertError> {
        if urgent {
            tracing::error!(channel = channel.as_str(), alert = %message, "URGENT ALERT");
        } else {
            tracing::warn!(channel = channel.as_str(), alert = %message, "ALERT");
        }
        Ok(())
    }
}

/// JSON body posted by [`WebhookAlertSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Alert text.
    pub message: String,
    /// Whether the alert should page.
    pub urgent: bool,
    /// Routing channel.
    pub channel: AlertChannel,
    /// Emitting service.
    pub source: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
}

/// Alert sink posting JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    url: String,
    source: String,
    http: reqwest::Client,
}

impl WebhookAlertSink {
    /// Creates a sink for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Result<Self, AlertError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_WEBHOOK_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            url: url.into(),
            source: source.into(),
            http,
        })
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(&self, message: &str, urgent: bool, channel: AlertChannel) -> AlertPayload {
        AlertPayload {
            message: message.to_string(),
            urgent,
            channel,
            source: self.source.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(
        &self,
        message: &str,
        urgent: bool,
        channel: AlertChannel,
    ) -> Result<(), AlertError> {
        let response = self
            .http
            .post(&self.url)
            .json(&self.payload(message, urgent, channel))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// A recorded alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAlert {
    /// Alert text.
    pub message: String,
    /// Whether the alert pages.
    pub urgent: bool,
    /// Routing channel.
    pub channel: AlertChannel,
}

/// Alert sink that keeps alerts in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertSink {
    alerts: Arc<Mutex<Vec<RecordedAlert>>>,
    fail: bool,
}

impl MemoryAlertSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that records alerts and then reports a delivery failure.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Returns the alerts received so far.
    pub async fn alerts(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().await.clone()
    }

    /// Returns the number of urgent alerts.
    pub async fn urgent_count(&self) -> usize {
        self.alerts.lock().await.iter().filter(|a| a.urgent).count()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn notify(
        &self,
        message: &str,
        urgent: bool,
        channel: AlertChannel,
    ) -> Result<(), AlertError> {
        self.alerts.lock().await.push(RecordedAlert {
            message: message.to_string(),
            urgent,
            channel,
        });
        if self.fail {
            return Err(AlertError::Delivery("sink unavailable".to_string()));
        }
        Ok(())
    }
}
