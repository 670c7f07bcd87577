//! Ethereum JSON-RPC chain client.
//!
//! Talks to a node over HTTP with `eth_blockNumber` and `eth_getLogs`.
//! Each event kind is selected by its configured topic0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::decode::{decode_event, encode_quantity, parse_quantity, RawLogData};
use super::error::ChainError;
use super::{ChainClient, ChainLog, EventKind};

/// Default request timeout in milliseconds.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;

/// topic0 hashes of the market contract events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTopics {
    /// `FPMMFundingAdded` topic.
    pub funding_added: String,
    /// `FPMMFundingRemoved` topic.
    pub funding_removed: String,
    /// `FPMMBuy` topic.
    pub buy: String,
    /// `FPMMSell` topic.
    pub sell: String,
    /// `Claimed` topic.
    pub claim: String,
}

impl EventTopics {
    /// Returns the topic for an event kind.
    #[must_use]
    pub fn topic(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::FundingAdded => &self.funding_added,
            EventKind::FundingRemoved => &self.funding_removed,
            EventKind::Buy => &self.buy,
            EventKind::Sell => &self.sell,
            EventKind::Claim => &self.claim,
        }
    }
}

/// Configuration for [`RpcChainClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Node HTTP endpoint.
    pub url: String,

    /// Request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Event topics.
    pub topics: EventTopics,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8545".to_string(),
            timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            topics: EventTopics::default(),
        }
    }
}

impl RpcConfig {
    /// Creates a configuration for the given endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the event topics.
    #[must_use]
    pub fn with_topics(mut self, topics: EventTopics) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or any topic is missing.
    pub fn validate(&self) -> Result<(), ChainError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ChainError::InvalidConfig(
                "rpc url must start with http:// or https://".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ChainError::InvalidConfig("timeout_ms must be > 0".to_string()));
        }
        if let Some(kind) = EventKind::ALL
            .into_iter()
            .find(|kind| self.topics.topic(*kind).is_empty())
        {
            return Err(ChainError::InvalidConfig(format!(
                "missing topic for {}",
                kind.as_str()
            )));
        }
        Ok(())
    }
}

/// JSON-RPC request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// JSON-RPC error details.
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    transaction_hash: String,
    block_number: String,
    log_index: String,
    topics: Vec<String>,
    data: String,
    #[serde(default)]
    removed: bool,
}

/// JSON-RPC client for EVM chains.
#[derive(Debug)]
pub struct RpcChainClient {
    config: RpcConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: RpcConfig) -> Result<Self, ChainError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .user_agent(format!("marketsync-indexer/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChainError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &RpcConfig {
        &self.config
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.config.url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!(
                "{method} returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: RpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result
            .ok_or_else(|| ChainError::Decode(format!("{method} returned no result")))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&head)
    }

    async fn query_events(
        &self,
        contract: &str,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, ChainError> {
        let filter = json!([{
            "address": contract,
            "fromBlock": encode_quantity(from),
            "toBlock": encode_quantity(to),
            "topics": [self.config.topics.topic(kind)],
        }]);
        let raw: Vec<RpcLog> = self.call("eth_getLogs", filter).await?;

        let mut logs = Vec::with_capacity(raw.len());
        for log in raw {
            // Reorged-out logs never reach a finalized window; seeing one
            // means the confirmation lag is too small.
            if log.removed {
                return Err(ChainError::Ordering(format!(
                    "removed log {} returned inside safe window",
                    log.transaction_hash
                )));
            }
            let event = decode_event(
                kind,
                RawLogData {
                    topics: &log.topics,
                    data: &log.data,
                },
            )?;
            logs.push(ChainLog {
                tx_hash: log.transaction_hash.to_ascii_lowercase(),
                block_number: parse_quantity(&log.block_number)?,
                log_index: parse_quantity(&log.log_index)?,
                event,
            });
        }

        logs.sort_by_key(ChainLog::position);
        Ok(logs)
    }
}
