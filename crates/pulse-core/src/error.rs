//! Error types for the Pulse event model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding events.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A queue message carried no payload bytes.
    #[error("empty payload in queue message {0}")]
    EmptyPayload(u64),

    /// A stored millisecond timestamp is outside the representable range.
    #[error("timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),
}
