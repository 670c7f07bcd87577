//! In-memory chain client.
//!
//! Replays a fixed set of decoded logs. Used for dry runs and for driving
//! the indexer deterministically in tests.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::ChainError;
use super::{ChainClient, ChainLog, EventKind};

/// Chain client backed by an in-memory log list.
///
/// Logs are returned for every contract address.
#[derive(Debug, Default)]
pub struct ScriptedChainClient {
    head: AtomicU64,
    logs: RwLock<Vec<ChainLog>>,
    head_failures: AtomicU32,
    query_failure: RwLock<Option<(i64, String)>>,
    query_calls: AtomicU64,
}

impl ScriptedChainClient {
    /// Creates a client reporting the given chain head.
    #[must_use]
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    /// Sets the initial log set.
    #[must_use]
    pub fn with_logs(self, logs: Vec<ChainLog>) -> Self {
        Self {
            logs: RwLock::new(logs),
            ..self
        }
    }

    /// Moves the chain head.
    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::Relaxed);
    }

    /// Makes the next `count` head requests time out.
    pub fn fail_next_head_requests(&self, count: u32) {
        self.head_failures.store(count, Ordering::Relaxed);
    }

    /// Makes every later `query_events` call fail with a JSON-RPC error.
    pub async fn fail_queries_with_rpc(&self, code: i64, message: impl Into<String>) {
        *self.query_failure.write().await = Some((code, message.into()));
    }

    /// Appends logs.
    pub async fn push_logs(&self, logs: impl IntoIterator<Item = ChainLog>) {
        self.logs.write().await.extend(logs);
    }

    /// Returns the number of `query_events` calls served.
    #[must_use]
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let consumed = self
            .head_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(ChainError::Timeout);
        }
        Ok(self.head.load(Ordering::Relaxed))
    }

    async fn query_events(
        &self,
        _contract: &str,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, ChainError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if let Some((code, message)) = self.query_failure.read().await.clone() {
            return Err(ChainError::Rpc { code, message });
        }
        let mut logs: Vec<ChainLog> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|log| log.event.kind() == kind)
            .filter(|log| log.block_number >= from && log.block_number <= to)
            .cloned()
            .collect();
        logs.sort_by_key(ChainLog::position);
        Ok(logs)
    }
}
