//! Append-only audit log.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::StoreError;

/// Audit entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational.
    Info,
    /// Degraded but recovering.
    Warning,
    /// Operation failed.
    Error,
    /// Operator action needed.
    Critical,
}

impl Severity {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Severity.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// Structured context.
    pub context: Value,
    /// Error text, if the entry records a failure.
    pub error: Option<String>,
    /// Correlation id shared with the log line and the alert.
    pub correlation_id: Option<Uuid>,
}

impl AuditEntry {
    /// Creates an entry with empty context.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            context: Value::Null,
            error: None,
            correlation_id: None,
        }
    }

    /// Sets the structured context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Records an error.
    #[must_use]
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Writes audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one entry.
    async fn write_log(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

/// Writes an audit entry, logging failures instead of returning them.
pub async fn write_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    if let Err(e) = sink.write_log(entry).await {
        tracing::warn!(error = %e, "Failed to write audit entry");
    }
}

/// Audit sink that emits log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write_log(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let correlation_id = entry.correlation_id.map(|id| id.to_string());
        tracing::info!(
            target: "audit",
            severity = entry.severity.as_str(),
            correlation_id = correlation_id.as_deref(),
            error = entry.error.as_deref(),
            context = %entry.context,
            "{}",
            entry.message
        );
        Ok(())
    }
}

/// Audit sink writing to the `audit_log` table.
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    /// Creates a sink on the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write_log(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_log (severity, message, context, error, correlation_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(entry.severity.as_str())
        .bind(&entry.message)
        .bind(&entry.context)
        .bind(entry.error.as_deref())
        .bind(entry.correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Audit sink that keeps entries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entries written so far.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write_log(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}
