//! Builds the future an indexer task runs.

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::runner::{EventIndexer, IndexerDeps};
use crate::types::MarketTarget;

/// Creates the body of an indexer task for a market.
///
/// The returned future must finish when `stop` turns true.
pub trait IndexerLauncher: Send + Sync {
    /// Returns the task body for `market`.
    fn launch(
        &self,
        market: MarketTarget,
        stop: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<(), IndexerError>>;
}

/// Launches [`EventIndexer`] loops.
#[derive(Clone)]
pub struct EventIndexerLauncher {
    config: IndexerConfig,
    deps: IndexerDeps,
}

impl EventIndexerLauncher {
    /// Creates a launcher sharing `deps` across all indexers.
    #[must_use]
    pub const fn new(config: IndexerConfig, deps: IndexerDeps) -> Self {
        Self { config, deps }
    }
}

impl IndexerLauncher for EventIndexerLauncher {
    fn launch(
        &self,
        market: MarketTarget,
        stop: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<(), IndexerError>> {
        let indexer = EventIndexer::new(market, self.config.clone(), self.deps.clone());
        Box::pin(indexer.run(stop))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alerts::{MemoryAlertSink, MemoryAuditSink};
    use crate::chain::ScriptedChainClient;
    use crate::events::{ChainCursor, IndexerMetrics};
    use crate::store::MemoryStore;
    use crate::types::MarketStatus;

    #[tokio::test]
    async fn test_launched_indexer_stops_on_signal() {
        let store = MemoryStore::new();
        store.insert_market(1, MarketStatus::Active).await;
        store.set_cursor(ChainCursor::new(1, "0xfpmm", 100, 50)).await;
        let metrics = Arc::new(IndexerMetrics::new());
        let deps = IndexerDeps {
            chain: Arc::new(ScriptedChainClient::new(0)),
            store: Arc::new(store),
            alerts: Arc::new(MemoryAlertSink::new()),
            audit: Arc::new(MemoryAuditSink::new()),
            metrics: Arc::clone(&metrics),
        };
        let launcher = EventIndexerLauncher::new(IndexerConfig::default().with_sleep_interval(5), deps);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(launcher.launch(
            MarketTarget {
                market_id: 1,
                contract_address: "0xfpmm".to_string(),
            },
            stop_rx,
        ));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        stop_tx.send(true).expect("stop");

        assert!(task.await.expect("join").is_ok());
        assert!(metrics.cycles_idle() >= 1);
    }
}
