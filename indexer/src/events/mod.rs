//! Event processing for the market indexer.
//!
//! This module turns decoded chain logs into immutable domain rows and
//! tracks how far each market has been indexed.
//!
//! # Components
//!
//! - [`types`]: derived records, `ProcessingResult`, `CycleOutcome`
//! - [`cursor`]: `ChainCursor` and the safe block window
//! - [`derive`]: pool share split and pool balance rules
//! - [`processor`]: `EventProcessor` implementation
//! - [`metrics`]: indexer metrics

pub mod cursor;
pub mod derive;
pub mod metrics;
pub mod processor;
pub mod types;

pub use cursor::{BlockWindow, ChainCursor, CursorError, CursorStatus};
pub use metrics::{IndexerMetrics, IndexerMetricsSnapshot};
pub use processor::EventProcessor;
pub use types::{
    ClaimRecord, CycleOutcome, DerivedRecord, FundingDirection, FundingRecord, LogRef,
    PoolAllocation, ProcessingResult, ShareTransaction, TradeSide,
};
