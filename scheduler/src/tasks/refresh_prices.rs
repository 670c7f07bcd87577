//! Singleton task refreshing the chances of every indexed market.

use std::sync::Arc;

use async_trait::async_trait;
use marketsync_indexer::store::{IndexStore, PricingStore};
use tracing::{info, warn};

use super::chances::recompute_market;
use crate::job::JobRecord;
use crate::lock::SingletonTask;

/// Job name guarding [`RefreshPricesTask`].
pub const REFRESH_PRICES_JOB: &str = "refresh-prices";

/// Recomputes chances for every market in the desired set.
pub struct RefreshPricesTask {
    markets: Arc<dyn IndexStore>,
    pricing: Arc<dyn PricingStore>,
}

impl RefreshPricesTask {
    /// Creates the task.
    #[must_use]
    pub fn new(markets: Arc<dyn IndexStore>, pricing: Arc<dyn PricingStore>) -> Self {
        Self { markets, pricing }
    }
}

#[async_trait]
impl SingletonTask for RefreshPricesTask {
    fn name(&self) -> &str {
        REFRESH_PRICES_JOB
    }

    async fn run(&self, _job: JobRecord) -> anyhow::Result<()> {
        let markets = self.markets.desired_markets().await?;
        let mut failed = 0_usize;
        let mut outcomes = 0_usize;

        for market in &markets {
            match recompute_market(self.pricing.as_ref(), market.market_id).await {
                Ok(updated) => outcomes += updated,
                Err(err) => {
                    failed += 1;
                    warn!(market_id = market.market_id, error = %err, "Failed to refresh chances");
                }
            }
        }

        info!(markets = markets.len(), outcomes, failed, "Prices refreshed");
        if failed > 0 {
            anyhow::bail!("{failed} of {} markets failed to refresh", markets.len());
        }
        Ok(())
    }
}
