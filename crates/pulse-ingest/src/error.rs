//! Error types for the ingestion pipeline.

use pulse_core::MessageId;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the queue, store, or processor.
#[derive(Error, Debug)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Event model error (encoding, decoding, timestamps).
    #[error("Event error: {0}")]
    Event(#[from] pulse_core::Error),

    /// Stream key is empty or contains a NUL byte.
    #[error("Invalid stream key: {0:?}")]
    InvalidStreamKey(String),

    /// Delivery group name is empty.
    #[error("Invalid delivery group name: {0:?}")]
    InvalidGroupName(String),

    /// Acknowledgement against a delivery group that was never created.
    #[error("Unknown delivery group '{group}' on stream '{stream}'")]
    UnknownGroup { stream: String, group: String },

    /// Acknowledgement of an id the stream never assigned.
    #[error("Unknown message {id} on stream '{stream}'")]
    UnknownMessage { stream: String, id: MessageId },

    /// Stored queue metadata could not be decoded.
    #[error("Corrupt queue metadata: {0}")]
    Corrupt(String),
}
