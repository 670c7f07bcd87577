//! Types for the event processor.
//!
//! Defines the immutable domain rows derived from chain logs and the
//! per-cycle processing result.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cursor::BlockWindow;
use crate::chain::EventKind;
use crate::types::{MarketId, UserId};

/// Direction of a liquidity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingDirection {
    /// Liquidity added.
    Add,
    /// Liquidity removed.
    Remove,
}

impl FundingDirection {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
        }
    }
}

/// Direction of a share trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    /// Shares bought with collateral.
    Buy,
    /// Shares sold for collateral.
    Sell,
}

impl TradeSide {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Chain position of the log a record was derived from.
///
/// `(market_id, tx_hash, log_index)` is unique across all derived rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRef {
    /// Market the log belongs to.
    pub market_id: MarketId,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block number.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u64,
}

/// Per-outcome slice of a liquidity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAllocation {
    /// Outcome index.
    pub outcome_index: u32,
    /// Collateral moved into or out of the outcome pool.
    pub amount: Decimal,
    /// Pool shares attributed to the outcome.
    pub pool_shares: Decimal,
}

/// A liquidity add or remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    /// Source log.
    pub log: LogRef,
    /// Liquidity provider.
    pub user_id: UserId,
    /// Add or remove.
    pub direction: FundingDirection,
    /// Total collateral moved across all outcomes.
    pub collateral: Decimal,
    /// Pool shares minted or burnt.
    pub shares: Decimal,
    /// Per-outcome split.
    pub allocations: Vec<PoolAllocation>,
}

/// A buy or sell of outcome shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareTransaction {
    /// Source log.
    pub log: LogRef,
    /// Trader.
    pub user_id: UserId,
    /// Buy or sell.
    pub side: TradeSide,
    /// Outcome traded.
    pub outcome_index: u32,
    /// Collateral spent (buy) or received (sell).
    pub collateral_amount: Decimal,
    /// Fee retained by the market maker.
    pub fee_amount: Decimal,
    /// Outcome shares received (buy) or given up (sell).
    pub share_amount: Decimal,
}

/// A payout redemption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Source log.
    pub log: LogRef,
    /// Redeemer.
    pub user_id: UserId,
    /// Collateral paid out.
    pub payout: Decimal,
}

/// Any row derived from a chain log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DerivedRecord {
    /// Liquidity change.
    Funding(FundingRecord),
    /// Share trade.
    Share(ShareTransaction),
    /// Payout redemption.
    Claim(ClaimRecord),
}

impl DerivedRecord {
    /// Returns the source log reference.
    #[must_use]
    pub const fn log(&self) -> &LogRef {
        match self {
            Self::Funding(r) => &r.log,
            Self::Share(r) => &r.log,
            Self::Claim(r) => &r.log,
        }
    }

    /// Returns the event kind the record was derived from.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Funding(r) => match r.direction {
                FundingDirection::Add => EventKind::FundingAdded,
                FundingDirection::Remove => EventKind::FundingRemoved,
            },
            Self::Share(r) => match r.side {
                TradeSide::Buy => EventKind::Buy,
                TradeSide::Sell => EventKind::Sell,
            },
            Self::Claim(_) => EventKind::Claim,
        }
    }
}

/// Result of applying one window of logs.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    /// Number of logs applied.
    pub events_processed: usize,
    /// Funding adds and removes.
    pub fundings: usize,
    /// Buys and sells.
    pub trades: usize,
    /// Claims.
    pub claims: usize,
    /// Whether a chance recomputation was enqueued.
    pub recompute_enqueued: bool,
}

impl ProcessingResult {
    /// Creates an empty result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if no events were processed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.events_processed == 0
    }

    /// Counts one record.
    pub fn record(&mut self, kind: EventKind) {
        self.events_processed += 1;
        match kind {
            EventKind::FundingAdded | EventKind::FundingRemoved => self.fundings += 1,
            EventKind::Buy | EventKind::Sell => self.trades += 1,
            EventKind::Claim => self.claims += 1,
        }
    }
}

/// What one indexer cycle did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// No safe blocks to process; the transaction was rolled back.
    Idle {
        /// Next block to process.
        from: u64,
        /// Highest safe block at the time of the cycle.
        safe_head: u64,
    },

    /// The window was applied and the cursor advanced.
    Committed {
        /// Window processed.
        window: BlockWindow,
        /// What was derived.
        result: ProcessingResult,
    },
}

impl CycleOutcome {
    /// Returns true if the cycle found no work.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }

    /// Returns the committed window, if any.
    #[must_use]
    pub const fn window(&self) -> Option<&BlockWindow> {
        match self {
            Self::Committed { window, .. } => Some(window),
            Self::Idle { .. } => None,
        }
    }
}
