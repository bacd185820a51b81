//! Durable queue between intake and the stream processor.
//!
//! The queue is an append-only, ordered log per stream key. Producers append
//! without waiting on consumers; the single consumer reads forward from a
//! position and acknowledges what it persisted under a delivery group.
//!
//! # Delivery Semantics
//!
//! - Messages within a stream are delivered in append order
//! - Each delivery group keeps a persisted cursor (highest acknowledged id)
//! - A consumer resumes after its group cursor on restart, so reads never
//!   re-scan history
//! - Acknowledging under an unregistered group is an error
//!
//! Delivery is at-least-once: a message persisted but not yet acknowledged
//! when the process stops is delivered again after restart.

mod rocks;

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{MessageId, QueueMessage};

use crate::Result;

pub use rocks::{QueueConfig, RocksQueue};

/// An append-only, independently durable ordered log.
///
/// Implementations are shared across request handlers and the processor via
/// `Arc<dyn EventQueue>` and provide their own internal synchronization.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Durably append `payload` to `stream`, returning its id.
    fn append(&self, stream: &str, payload: &[u8]) -> Result<MessageId>;

    /// Return the next messages strictly after `after`, waiting until at
    /// least one exists.
    ///
    /// `block = None` waits indefinitely; `Some(limit)` returns an empty batch
    /// once `limit` elapses. Dropping the returned future cancels the wait
    /// without consuming anything.
    async fn read_blocking(
        &self,
        stream: &str,
        after: MessageId,
        block: Option<Duration>,
    ) -> Result<Vec<QueueMessage>>;

    /// Register a delivery group whose cursor starts at `start`.
    ///
    /// Returns `false` if the group already existed (its cursor is kept).
    fn create_group(&self, stream: &str, group: &str, start: MessageId) -> Result<bool>;

    /// Mark `id` as processed for `group`, advancing the group cursor.
    fn acknowledge(&self, stream: &str, group: &str, id: MessageId) -> Result<()>;

    /// Current cursor of `group`, or `None` if the group does not exist.
    fn group_cursor(&self, stream: &str, group: &str) -> Result<Option<MessageId>>;

    /// Number of messages ever appended to `stream`.
    fn len(&self, stream: &str) -> Result<u64>;
}
