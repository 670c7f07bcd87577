//! Chain cursor for tracking indexing progress.
//!
//! Provides the per-market block cursor and the safe-window computation
//! that keeps retries idempotent: a window is always derived from the
//! committed cursor, so a rolled-back cycle re-reads the same range.

use serde::{Deserialize, Serialize};

use crate::types::MarketId;

/// Whether the chain-data row is eligible for indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CursorStatus {
    /// The market should be indexed.
    Enabled,
    /// Indexing is switched off for this market.
    Disabled,
}

impl CursorStatus {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
        }
    }

    /// Parses the database representation. Unknown values are disabled.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ENABLED") {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// An inclusive range of blocks processed in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWindow {
    /// First block of the window.
    pub from: u64,
    /// Last block of the window.
    pub to: u64,
}

impl BlockWindow {
    /// Number of blocks covered.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Always false: a window covers at least one block.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if the block lies within the window.
    #[must_use]
    pub const fn contains(&self, block: u64) -> bool {
        block >= self.from && block <= self.to
    }
}

/// Per-market cursor over the chain.
///
/// `last_processed_block` is the last block whose events are durably
/// applied. It only moves forward, and only through [`ChainCursor::advance`]
/// with the window that was just committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCursor {
    /// Market this cursor belongs to.
    pub market_id: MarketId,
    /// Market contract address, if deployed.
    pub contract_address: Option<String>,
    /// Last fully applied block.
    pub last_processed_block: u64,
    /// Maximum number of blocks per cycle.
    pub window_size: u64,
    /// Eligibility for indexing.
    pub status: CursorStatus,
}

impl ChainCursor {
    /// Creates an enabled cursor.
    #[must_use]
    pub fn new(
        market_id: MarketId,
        contract_address: impl Into<String>,
        last_processed_block: u64,
        window_size: u64,
    ) -> Self {
        Self {
            market_id,
            contract_address: Some(contract_address.into()),
            last_processed_block,
            window_size,
            status: CursorStatus::Enabled,
        }
    }

    /// Returns the first block not yet processed.
    #[must_use]
    pub const fn next_block(&self) -> u64 {
        self.last_processed_block.saturating_add(1)
    }

    /// Returns true if the given block has been processed.
    #[must_use]
    pub const fn is_processed(&self, block: u64) -> bool {
        block <= self.last_processed_block
    }

    /// Returns true if the cursor is enabled and has a contract address.
    #[must_use]
    pub fn is_indexable(&self) -> bool {
        self.status == CursorStatus::Enabled
            && self
                .contract_address
                .as_deref()
                .is_some_and(|address| !address.is_empty())
    }

    /// Returns the highest block considered final given the chain head.
    #[must_use]
    pub const fn safe_head(chain_head: u64, confirmation_lag: u64) -> u64 {
        chain_head.saturating_sub(confirmation_lag)
    }

    /// Computes the next window to process.
    ///
    /// `from = last_processed_block + 1`, `to = min(from + window_size - 1,
    /// chain_head - confirmation_lag)`. Returns `None` when no safe block is
    /// available yet.
    #[must_use]
    pub fn next_window(&self, chain_head: u64, confirmation_lag: u64) -> Option<BlockWindow> {
        let from = self.next_block();
        let span = self.window_size.max(1) - 1;
        let to = from
            .saturating_add(span)
            .min(Self::safe_head(chain_head, confirmation_lag));
        (from <= to).then_some(BlockWindow { from, to })
    }

    /// Returns the number of safe blocks not yet processed.
    #[must_use]
    pub fn lag_behind(&self, chain_head: u64, confirmation_lag: u64) -> u64 {
        Self::safe_head(chain_head, confirmation_lag).saturating_sub(self.last_processed_block)
    }

    /// Moves the cursor to the end of a committed window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window does not start right after the
    /// current cursor position.
    pub fn advance(&mut self, window: &BlockWindow) -> Result<(), CursorError> {
        if window.from != self.next_block() || window.to < window.from {
            return Err(CursorError::NonContiguous {
                cursor: self.last_processed_block,
                from: window.from,
                to: window.to,
            });
        }
        self.last_processed_block = window.to;
        Ok(())
    }
}

/// Cursor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// The window would skip or replay blocks.
    #[error("window [{from}, {to}] does not continue cursor at {cursor}")]
    NonContiguous {
        /// Current cursor position.
        cursor: u64,
        /// Window start.
        from: u64,
        /// Window end.
        to: u64,
    },
}
