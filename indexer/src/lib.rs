//! Marketsync Indexer - Mirrors on-chain market events into PostgreSQL.
//!
//! This crate runs one indexer task per active market. Each task reads the
//! market contract's event logs in confirmed block windows and applies them
//! to the relational store in one transaction per window, together with the
//! cursor advance. A supervisor keeps the set of running tasks equal to the
//! set of markets that need indexing.
//!
//! # Components
//!
//! - [`chain`]: Chain client, event model and JSON-RPC transport
//! - [`events`]: Cursor arithmetic, event processing and metrics
//! - [`store`]: Transactional store interfaces with Postgres and in-memory backends
//! - [`runner`]: The per-market indexer loop
//! - [`supervisor`]: Reconciles running indexers with the desired set
//! - [`alerts`]: Operator alerts and the audit trail
//! - [`config`]: Service configuration

pub mod alerts;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod runner;
pub mod store;
pub mod supervisor;
pub mod types;

pub use alerts::{AlertChannel, AlertSink, AuditEntry, AuditSink, Severity};
pub use chain::{ChainClient, ChainError, ChainLog, EventKind, MarketEvent};
pub use config::{ConfigError, IndexerConfig, ServiceConfig, SupervisorConfig};
pub use error::IndexerError;
pub use events::{BlockWindow, ChainCursor, CycleOutcome, EventProcessor, IndexerMetrics};
pub use runner::{process_name, EventIndexer, IndexerDeps};
pub use store::{IndexStore, IndexTx, PricingStore, StoreError};
pub use supervisor::{PlanReport, Supervisor, SupervisorMetrics};
pub use types::{MarketId, MarketStatus, MarketTarget, Outcome, WorkItem, WorkKind, WorkStatus};
