//! Shared domain types.
//!
//! Markets, outcomes and queued follow-up work as they are mirrored from
//! chain into the relational store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Primary key of a market row.
pub type MarketId = i64;

/// Primary key of a user row.
pub type UserId = i64;

/// Lifecycle status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    /// Created off-chain, contract not deployed yet.
    Initialized,
    /// Deployment submitted, awaiting confirmation.
    Pending,
    /// Trading is open.
    Active,
    /// Accepting liquidity before trading opens.
    Funding,
    /// Resolved and paid out.
    Finalized,
    /// Deployment or resolution failed.
    Error,
    /// Resolution vote in progress.
    Voting,
}

impl MarketStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Initialized,
        Self::Pending,
        Self::Active,
        Self::Funding,
        Self::Finalized,
        Self::Error,
        Self::Voting,
    ];

    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Funding => "FUNDING",
            Self::Finalized => "FINALIZED",
            Self::Error => "ERROR",
            Self::Voting => "VOTING",
        }
    }

    /// Returns true if markets in this status have live on-chain activity
    /// that must be indexed.
    #[must_use]
    pub const fn needs_indexing(&self) -> bool {
        matches!(self, Self::Active | Self::Funding)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A status string that does not map to a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// A market the supervisor should be indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTarget {
    /// Market id.
    pub market_id: MarketId,
    /// Market contract address (lower-case hex).
    pub contract_address: String,
}

/// One outcome of a market with its liquidity pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Owning market.
    pub market_id: MarketId,
    /// Position of the outcome in the contract's outcome array.
    pub index: u32,
    /// Collateral held in the outcome pool.
    pub pool_balance: Decimal,
    /// Last computed probability, in `[0, 1]`.
    pub chance: Decimal,
}

impl Outcome {
    /// Creates an outcome with an empty pool.
    #[must_use]
    pub fn new(market_id: MarketId, index: u32) -> Self {
        Self {
            market_id,
            index,
            pool_balance: Decimal::ZERO,
            chance: Decimal::ZERO,
        }
    }

    /// Sets the pool balance.
    #[must_use]
    pub fn with_pool(mut self, pool_balance: Decimal) -> Self {
        self.pool_balance = pool_balance;
        self
    }
}

/// Kind of follow-up work the indexer hands to fan-out workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Recompute outcome chances from pool balances.
    RecomputeChances,
}

impl WorkKind {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecomputeChances => "recompute_chances",
        }
    }
}

impl FromStr for WorkKind {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recompute_chances" => Ok(Self::RecomputeChances),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Queue state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    /// Waiting for a worker.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished.
    Done,
}

impl WorkStatus {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
        }
    }
}

impl FromStr for WorkStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A queued follow-up task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Queue id.
    pub id: i64,
    /// What to do.
    pub kind: WorkKind,
    /// Market the work applies to.
    pub market_id: MarketId,
    /// Queue state.
    pub status: WorkStatus,
    /// When the item was enqueued.
    pub enqueued_at: DateTime<Utc>,
}
