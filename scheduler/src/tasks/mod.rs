//! Concrete scheduler tasks.

pub mod chances;
pub mod refresh_prices;

pub use chances::{compute_chances, recompute_market, ChanceRecomputeWorker};
pub use refresh_prices::{RefreshPricesTask, REFRESH_PRICES_JOB};
