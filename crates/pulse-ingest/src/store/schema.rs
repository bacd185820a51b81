//! SQLite schema for the event store.
//!
//! The `events` table is the base table; `user_engagement` is a derived table
//! that acts as a materialized view and is only ever rewritten by an explicit
//! refresh (see [`super::EventStore::refresh_engagement`]).

use rusqlite::{Connection, OptionalExtension};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Secondary indexes on `events`, created one by one.
const EVENT_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_user_id ON events(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_action ON events(action)",
];

/// Initialize the database schema.
///
/// Creates the base table, its indexes, and the engagement view tables if
/// they don't exist. Index creation failures are logged and skipped; the
/// base table is required, the indexes are not.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    let current_version = get_schema_version(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            action TEXT NOT NULL,
            element TEXT NOT NULL,
            duration REAL NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;

    for index_sql in EVENT_INDEXES {
        if let Err(e) = conn.execute(index_sql, []) {
            tracing::warn!(error = %e, sql = *index_sql, "failed to create index");
        }
    }

    conn.execute_batch(
        r#"
        -- Per-user aggregate, rebuilt wholesale on refresh
        CREATE TABLE IF NOT EXISTS user_engagement (
            user_id TEXT PRIMARY KEY,
            total_events INTEGER NOT NULL,
            total_duration REAL NOT NULL,
            active_days INTEGER NOT NULL
        );

        -- Last rebuild time per derived view
        CREATE TABLE IF NOT EXISTS view_refresh (
            view_name TEXT PRIMARY KEY,
            refreshed_at INTEGER NOT NULL,
            row_count INTEGER NOT NULL
        );
        "#,
    )?;

    if current_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    tracing::info!(version = SCHEMA_VERSION, "event store schema ready");
    Ok(())
}

/// Get the current schema version (0 if not initialized).
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}
