//! Marketsync - On-chain prediction-market indexing and background jobs.
//!
//! This crate bundles the workspace members under one name.
//!
//! # Components
//!
//! - [`indexer`]: Per-market event indexers and the process supervisor
//! - [`scheduler`]: Singleton job locking and fan-out workers

/// Chain indexing and process supervision.
pub use marketsync_indexer as indexer;

/// Singleton jobs and fan-out workers.
pub use marketsync_scheduler as scheduler;
