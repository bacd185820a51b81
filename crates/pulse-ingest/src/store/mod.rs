//! Relational event store backed by SQLite.
//!
//! [`EventStore`] owns a single connection behind `Arc<Mutex<_>>` and is cheap
//! to clone; the stream processor writes through it and the HTTP handlers
//! read through it. Queries are split across submodules:
//!
//! - [`schema`] - table, index, and view initialization
//! - `snapshot` - live metrics over the trailing window
//! - `engagement` - the manually refreshed per-user aggregate
//!
//! Timestamps are stored as Unix milliseconds so window filters are plain
//! integer comparisons on an indexed column.

mod engagement;
pub mod schema;
mod snapshot;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::{Event, timestamp_from_millis};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use engagement::{EngagementRow, EngagementView, RefreshReport};

/// Name recorded in `view_refresh` for the engagement view.
pub const ENGAGEMENT_VIEW: &str = "user_engagement";

/// A persisted event with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    #[serde(flatten)]
    pub event: Event,
}

/// Shared handle to the event database.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Open (or create) the database at `path` and initialize its schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening event store at {}", path.display());

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::debug!(journal_mode = %mode, "event store connection ready");

        let store = Self::from_connection(conn);
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database with the schema initialized.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.init_schema()?;
        Ok(store)
    }

    /// Wrap an existing connection without touching its schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create tables, indexes, and view tables if absent.
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        schema::init_schema(&conn)?;
        Ok(())
    }

    /// Insert one event, returning its row id.
    ///
    /// Values are bound as parameters; no deduplication is performed, so
    /// inserting the same event twice yields two rows.
    pub fn insert_event(&self, event: &Event) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (user_id, action, element, duration, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.user_id,
                event.action,
                event.element,
                event.duration,
                event.timestamp_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All rows for `user_id`, oldest first.
    pub fn events_for_user(&self, user_id: &str) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, action, element, duration, timestamp
             FROM events
             WHERE user_id = ?1
             ORDER BY id",
        )?;

        let raw = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, user_id, action, element, duration, millis)| {
                Ok(EventRow {
                    id,
                    event: Event {
                        user_id,
                        action,
                        element,
                        duration,
                        timestamp: timestamp_from_millis(millis)?,
                    },
                })
            })
            .collect()
    }

    /// Total number of persisted events.
    pub fn event_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
