//! Marketsync Scheduler binary.
//!
//! Entry point for the scheduler service that runs singleton jobs and
//! fan-out workers.

use std::sync::Arc;

use anyhow::Context;
use marketsync_indexer::alerts::{AlertSink, TracingAlertSink, WebhookAlertSink};
use marketsync_indexer::store::{IndexStore, PgStore, PricingStore};
use marketsync_scheduler::{
    ChanceRecomputeWorker, JobLockManager, PgJobStore, RefreshPricesTask, SchedulerService,
    SchedulerServiceConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketsync_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SchedulerServiceConfig::from_env().context("invalid configuration")?;

    tracing::info!("Starting Marketsync Scheduler");
    tracing::info!("Poll interval: {} ms", config.scheduler.poll_interval_ms);
    tracing::info!("Fan-out concurrency: {}", config.scheduler.fanout_concurrency);
    tracing::info!("Jobs: {}", config.scheduler.jobs.join(", "));

    let store = Arc::new(
        PgStore::connect(&config.database_url, config.max_connections)
            .await
            .context("failed to connect to database")?,
    );
    let jobs = Arc::new(PgJobStore::new(store.pool().clone()));

    let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(
            WebhookAlertSink::new(url.clone(), "marketsync-scheduler")
                .context("failed to build alert webhook client")?,
        ),
        None => {
            tracing::warn!("ALERT_WEBHOOK_URL not set, alerts go to the log only");
            Arc::new(TracingAlertSink)
        }
    };

    let locks = JobLockManager::new(jobs).with_alerts(alerts);
    let service = SchedulerService::new(config.scheduler.clone(), locks)
        .context("invalid scheduler configuration")?
        .with_singleton(Arc::new(RefreshPricesTask::new(
            Arc::clone(&store) as Arc<dyn IndexStore>,
            Arc::clone(&store) as Arc<dyn PricingStore>,
        )))
        .with_fanout(Arc::new(ChanceRecomputeWorker::new(
            Arc::clone(&store) as Arc<dyn PricingStore>,
            config.scheduler.fanout_batch_size,
        )));
    let service = Arc::new(service);

    let runner = Arc::clone(&service);
    let task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down scheduler");
    service.stop();
    task.await.context("scheduler task failed")?;

    tracing::info!(metrics = ?service.metrics().snapshot(), "Final metrics");
    Ok(())
}
