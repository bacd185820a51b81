//! Core types and shared utilities for the Pulse analytics pipeline.
//!
//! This crate provides:
//! - The interaction [`Event`] model and its intake wire form
//! - The typed queue envelope ([`QueueMessage`], [`MessageId`])
//! - The computed [`MetricsSnapshot`] returned by the live metrics query
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Stream key that carries live ingestion traffic.
pub const DEFAULT_STREAM_KEY: &str = "events:live";

/// Delivery group the stream processor acknowledges under.
pub const DEFAULT_CONSUMER_GROUP: &str = "events-group";

/// Trailing window every live metric is scoped to.
pub const METRICS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Number of elements reported in [`MetricsSnapshot::top_elements`].
pub const TOP_ELEMENTS_LIMIT: usize = 5;

pub use error::{Error, Result};
pub use event::{
    ElementCount, Event, IncomingEvent, MessageId, MetricsSnapshot, QueueMessage,
    is_zero_timestamp, timestamp_from_millis,
};
