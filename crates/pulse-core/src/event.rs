//! Interaction event model and queue envelope.
//!
//! Events travel through the pipeline as field-named JSON:
//! - Clients post an [`IncomingEvent`] where every field is optional
//! - Intake turns it into an [`Event`] with a guaranteed timestamp
//! - The queue carries the encoded event inside a [`QueueMessage`]
//! - The stream processor decodes it once, at the queue boundary

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One recorded user interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub action: String,
    pub element: String,
    /// Measured duration; `0.0` means not applicable.
    #[serde(default)]
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

/// Event as posted by a client.
///
/// Missing and `null` fields are accepted; intake validation is structural
/// only, so an empty `user_id` or `action` still produces an event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingEvent {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Whether a client-supplied timestamp counts as "not provided".
///
/// Anything at or before the Unix epoch is treated as a zero value, which
/// covers clients that serialize an unset time as `0001-01-01T00:00:00Z`.
pub fn is_zero_timestamp(ts: &DateTime<Utc>) -> bool {
    ts.timestamp_millis() <= 0
}

impl IncomingEvent {
    /// Parse a request body.
    ///
    /// A bare `null` body yields an all-empty event.
    pub fn from_json_bytes(body: &[u8]) -> Result<Self> {
        let incoming: Option<Self> = serde_json::from_slice(body)?;
        Ok(incoming.unwrap_or_default())
    }

    /// Build the pipeline event, stamping `accepted_at` when the client
    /// omitted the timestamp.
    ///
    /// Timestamps are truncated to millisecond precision, the resolution the
    /// store keeps.
    pub fn into_event(self, accepted_at: DateTime<Utc>) -> Event {
        let timestamp = match self.timestamp {
            Some(ts) if !is_zero_timestamp(&ts) => ts,
            _ => accepted_at,
        };

        Event {
            user_id: self.user_id.unwrap_or_default(),
            action: self.action.unwrap_or_default(),
            element: self.element.unwrap_or_default(),
            duration: self.duration.unwrap_or(0.0),
            timestamp: timestamp.trunc_subsecs(3),
        }
    }
}

impl Event {
    /// Encode as field-named JSON for the queue.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from queue payload bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Timestamp as Unix milliseconds (storage representation).
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Convert stored Unix milliseconds back into a timestamp.
pub fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(Error::InvalidTimestamp(millis))
}

// ═══════════════════════════════════════════════════════════════════════════
// Queue envelope
// ═══════════════════════════════════════════════════════════════════════════

/// Position of a message within a stream.
///
/// Ids are assigned by the queue, start at 1 and increase strictly per
/// stream. [`MessageId::START`] is the position before the first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const START: MessageId = MessageId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The id immediately after this one.
    pub fn next(self) -> MessageId {
        MessageId(self.0.saturating_add(1))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message delivered by the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

impl QueueMessage {
    /// Decode the payload into an [`Event`].
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPayload`] if the message has no bytes
    /// - [`Error::Json`] if the bytes are not an encoded event
    pub fn decode_event(&self) -> Result<Event> {
        if self.payload.is_empty() {
            return Err(Error::EmptyPayload(self.id.as_u64()));
        }
        Event::from_json_bytes(&self.payload)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Live metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Event count for one UI element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCount {
    pub element: String,
    pub count: u64,
}

/// Rolling statistics over the trailing [`crate::METRICS_WINDOW`].
///
/// Recomputed on every query; never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_users: u64,
    /// Window event count divided by the window length in minutes.
    pub events_per_min: f64,
    /// Mean of positive durations; `0.0` when none qualify.
    pub avg_duration: f64,
    /// At most five elements, highest count first.
    pub top_elements: Vec<ElementCount>,
}
