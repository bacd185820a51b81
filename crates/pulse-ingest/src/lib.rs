//! Pulse ingestion pipeline components.
//!
//! This crate moves user interaction events from the HTTP edge into the
//! relational store, with a durable queue in between so intake never waits on
//! the database.
//!
//! # Modules
//!
//! - [`intake`] - Validates posted events and appends them to the queue
//! - [`queue`] - Durable, ordered log with delivery groups (RocksDB)
//! - [`processor`] - Background task draining the queue into the store
//! - [`store`] - Event table, live metrics, engagement view (SQLite)
//! - [`refresh`] - Periodic rebuild of the engagement view
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  IntakeService  │  Parses body, stamps timestamp, appends once
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   RocksQueue    │  RocksDB - append-only stream, group cursors
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StreamProcessor │  Decode, insert, acknowledge; skip on failure
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   EventStore    │  SQLite - events, metrics queries, engagement view
//! └─────────────────┘
//! ```
//!
//! The queue is the hand-off point: an accepted event is durable once it is
//! appended, and becomes queryable only after the processor persists it.

pub mod error;
pub mod intake;
pub mod processor;
pub mod queue;
pub mod refresh;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use intake::{Accepted, IntakeError, IntakeService};
pub use processor::{
    ProcessingError, ProcessorConfig, ProcessorStats, ProcessorStatsSnapshot, StreamProcessor,
};
pub use queue::{EventQueue, QueueConfig, RocksQueue};
pub use refresh::{DEFAULT_REFRESH_INTERVAL, ViewRefresher};
pub use store::{EngagementRow, EngagementView, EventRow, EventStore, RefreshReport};
