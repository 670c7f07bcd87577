//! Marketsync Indexer binary.
//!
//! Entry point for the market indexing service.

use std::sync::Arc;

use anyhow::Context;
use marketsync_indexer::alerts::{AlertSink, PgAuditSink, TracingAlertSink, WebhookAlertSink};
use marketsync_indexer::chain::RpcChainClient;
use marketsync_indexer::store::PgStore;
use marketsync_indexer::{IndexerDeps, IndexerMetrics, ServiceConfig, Supervisor};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketsync_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    tracing::info!("Starting Marketsync Indexer");
    tracing::info!("Chain RPC: {}", config.rpc.url);
    tracing::info!(
        "Confirmation lag: {} blocks, default window: {} blocks",
        config.indexer.confirmation_lag,
        config.indexer.default_window_size
    );

    let store = PgStore::connect(&config.database_url, config.max_connections)
        .await
        .context("failed to connect to database")?;
    let chain = RpcChainClient::new(config.rpc.clone()).context("failed to build chain client")?;

    let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(
            WebhookAlertSink::new(url.clone(), "marketsync-indexer")
                .context("failed to build alert webhook client")?,
        ),
        None => {
            tracing::warn!("ALERT_WEBHOOK_URL not set, alerts go to the log only");
            Arc::new(TracingAlertSink)
        }
    };

    let deps = IndexerDeps {
        chain: Arc::new(chain),
        audit: Arc::new(PgAuditSink::new(store.pool().clone())),
        store: Arc::new(store),
        alerts,
        metrics: Arc::new(IndexerMetrics::new()),
    };
    let metrics = Arc::clone(&deps.metrics);

    let supervisor = Supervisor::for_indexers(config.supervisor.clone(), config.indexer.clone(), deps);
    let supervisor_metrics = supervisor.metrics();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down indexer");
    // The receiver only closes once the supervisor has already returned.
    let _ = shutdown_tx.send(true);
    task.await.context("supervisor task failed")?;

    tracing::info!(
        indexer = ?metrics.snapshot(),
        supervisor = ?supervisor_metrics.snapshot(),
        "Final metrics"
    );
    Ok(())
}
