//! Chain client boundary.
//!
//! Logs are decoded exactly once, here, into a strongly typed
//! [`MarketEvent`] per event kind. Everything downstream works on
//! [`ChainLog`] values ordered by `(block_number, log_index)`.
//!
//! # Components
//!
//! - [`decode`]: ABI word decoding for market contract logs
//! - [`rpc`]: Ethereum JSON-RPC client
//! - [`scripted`]: In-memory client replaying a fixed log set

pub mod decode;
pub mod error;
pub mod rpc;
pub mod scripted;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use error::ChainError;
pub use rpc::{EventTopics, RpcChainClient, RpcConfig};
pub use scripted::ScriptedChainClient;

/// Market contract event kinds the indexer queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Liquidity added to the market maker.
    FundingAdded,
    /// Liquidity removed from the market maker.
    FundingRemoved,
    /// Outcome shares bought.
    Buy,
    /// Outcome shares sold.
    Sell,
    /// Winnings redeemed.
    Claim,
}

impl EventKind {
    /// Every kind, in the order they are queried.
    pub const ALL: [Self; 5] = [
        Self::FundingAdded,
        Self::FundingRemoved,
        Self::Buy,
        Self::Sell,
        Self::Claim,
    ];

    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FundingAdded => "funding_added",
            Self::FundingRemoved => "funding_removed",
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Claim => "claim",
        }
    }
}

/// A decoded market contract event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// `FPMMFundingAdded(address indexed funder, uint[] amountsAdded, uint sharesMinted)`
    FundingAdded {
        /// Liquidity provider wallet.
        funder: String,
        /// Collateral added per outcome.
        amounts_added: Vec<Decimal>,
        /// Pool shares minted to the funder.
        shares_minted: Decimal,
    },

    /// `FPMMFundingRemoved(address indexed funder, uint[] amountsRemoved,
    /// uint collateralRemovedFromFeePool, uint sharesBurnt)`
    FundingRemoved {
        /// Liquidity provider wallet.
        funder: String,
        /// Collateral removed per outcome.
        amounts_removed: Vec<Decimal>,
        /// Collateral paid out of the fee pool.
        collateral_removed: Decimal,
        /// Pool shares burnt.
        shares_burnt: Decimal,
    },

    /// `FPMMBuy(address indexed buyer, uint investmentAmount, uint feeAmount,
    /// uint indexed outcomeIndex, uint outcomeTokensBought)`
    Buy {
        /// Buyer wallet.
        buyer: String,
        /// Collateral spent, fee included.
        investment_amount: Decimal,
        /// Fee retained by the market maker.
        fee_amount: Decimal,
        /// Outcome bought.
        outcome_index: u32,
        /// Outcome tokens received.
        outcome_tokens_bought: Decimal,
    },

    /// `FPMMSell(address indexed seller, uint returnAmount, uint feeAmount,
    /// uint indexed outcomeIndex, uint outcomeTokensSold)`
    Sell {
        /// Seller wallet.
        seller: String,
        /// Collateral returned to the seller.
        return_amount: Decimal,
        /// Fee retained by the market maker.
        fee_amount: Decimal,
        /// Outcome sold.
        outcome_index: u32,
        /// Outcome tokens given up.
        outcome_tokens_sold: Decimal,
    },

    /// `Claimed(address indexed redeemer, uint payout)`
    Claim {
        /// Redeemer wallet.
        redeemer: String,
        /// Collateral paid out.
        payout: Decimal,
    },
}

impl MarketEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::FundingAdded { .. } => EventKind::FundingAdded,
            Self::FundingRemoved { .. } => EventKind::FundingRemoved,
            Self::Buy { .. } => EventKind::Buy,
            Self::Sell { .. } => EventKind::Sell,
            Self::Claim { .. } => EventKind::Claim,
        }
    }

    /// Returns the wallet that triggered the event.
    #[must_use]
    pub fn wallet(&self) -> &str {
        match self {
            Self::FundingAdded { funder, .. } | Self::FundingRemoved { funder, .. } => funder,
            Self::Buy { buyer, .. } => buyer,
            Self::Sell { seller, .. } => seller,
            Self::Claim { redeemer, .. } => redeemer,
        }
    }
}

/// A decoded log with its chain position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLog {
    /// Transaction hash (lower-case hex).
    pub tx_hash: String,
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Position of the log within the block.
    pub log_index: u64,
    /// Decoded payload.
    pub event: MarketEvent,
}

impl ChainLog {
    /// Returns the chain ordering key.
    #[must_use]
    pub const fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Read access to the chain.
///
/// Implementations must be deterministic for a finalized range and return
/// logs strictly ordered by `(block_number, log_index)`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Returns the current chain head.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Returns the logs of one kind emitted by `contract` in `[from, to]`.
    async fn query_events(
        &self,
        contract: &str,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, ChainError>;
}

/// Queries every event kind and merges the results in chain order.
///
/// # Errors
///
/// Returns the first client error, or [`ChainError::Ordering`] if two logs
/// share a position.
pub async fn fetch_ordered(
    client: &dyn ChainClient,
    contract: &str,
    from: u64,
    to: u64,
) -> Result<Vec<ChainLog>, ChainError> {
    let mut logs = Vec::new();
    for kind in EventKind::ALL {
        logs.extend(client.query_events(contract, kind, from, to).await?);
    }
    logs.sort_by_key(ChainLog::position);

    if let Some(pair) = logs.windows(2).find(|pair| match pair {
        [a, b] => a.position() == b.position(),
        _ => false,
    }) {
        let (block, index) = pair.first().map(ChainLog::position).unwrap_or_default();
        return Err(ChainError::Ordering(format!(
            "duplicate log position ({block}, {index})"
        )));
    }

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(block: u64, index: u64) -> ChainLog {
        ChainLog {
            tx_hash: format!("0x{block:x}{index:x}"),
            block_number: block,
            log_index: index,
            event: MarketEvent::Claim {
                redeemer: "0xaa".to_string(),
                payout: Decimal::ONE,
            },
        }
    }

    #[test]
    fn test_event_kind_as_str() {
        assert_eq!(EventKind::FundingAdded.as_str(), "funding_added");
        assert_eq!(EventKind::Claim.as_str(), "claim");
    }

    #[test]
    fn test_market_event_kind_and_wallet() {
        let event = MarketEvent::Buy {
            buyer: "0xbuyer".to_string(),
            investment_amount: Decimal::from(10),
            fee_amount: Decimal::ONE,
            outcome_index: 1,
            outcome_tokens_bought: Decimal::from(18),
        };
        assert_eq!(event.kind(), EventKind::Buy);
        assert_eq!(event.wallet(), "0xbuyer");
    }

    #[tokio::test]
    async fn test_fetch_ordered_merges_kinds() {
        let buy = ChainLog {
            event: MarketEvent::Buy {
                buyer: "0xbb".to_string(),
                investment_amount: Decimal::TEN,
                fee_amount: Decimal::ZERO,
                outcome_index: 0,
                outcome_tokens_bought: Decimal::TEN,
            },
            ..claim(10, 0)
        };
        let client = ScriptedChainClient::new(100).with_logs(vec![claim(12, 1), claim(10, 3), buy]);

        let logs = fetch_ordered(&client, "0xmarket", 1, 100).await.expect("logs");
        let positions: Vec<(u64, u64)> = logs.iter().map(ChainLog::position).collect();
        assert_eq!(positions, vec![(10, 0), (10, 3), (12, 1)]);
    }

    #[tokio::test]
    async fn test_fetch_ordered_rejects_duplicate_positions() {
        let client = ScriptedChainClient::new(100).with_logs(vec![claim(10, 1), claim(10, 1)]);
        let result = fetch_ordered(&client, "0xmarket", 1, 100).await;
        assert!(matches!(result, Err(ChainError::Ordering(_))));
    }
}
