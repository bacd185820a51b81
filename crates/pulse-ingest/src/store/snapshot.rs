//! Live metrics over the trailing window.

use chrono::{DateTime, Utc};
use pulse_core::{ElementCount, METRICS_WINDOW, MetricsSnapshot, TOP_ELEMENTS_LIMIT};

use super::EventStore;
use crate::Result;

impl EventStore {
    /// Compute the live metrics for events with `timestamp > now - 5 min`.
    ///
    /// All four aggregates run under one connection lock. Any failing query
    /// fails the whole snapshot; there is no partial result.
    ///
    /// `top_elements` ties are ordered by element name so results are stable.
    pub fn metrics_snapshot(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        let cutoff = now.timestamp_millis() - METRICS_WINDOW.as_millis() as i64;
        let window_minutes = METRICS_WINDOW.as_secs_f64() / 60.0;

        let conn = self.conn.lock();

        let active_users: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM events WHERE timestamp > ?1",
            [cutoff],
            |row| row.get(0),
        )?;

        let window_events: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE timestamp > ?1",
            [cutoff],
            |row| row.get(0),
        )?;

        // AVG over zero rows is NULL
        let avg_duration: Option<f64> = conn.query_row(
            "SELECT AVG(duration) FROM events WHERE timestamp > ?1 AND duration > 0",
            [cutoff],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT element, COUNT(*) AS count
             FROM events
             WHERE timestamp > ?1
             GROUP BY element
             ORDER BY count DESC, element ASC
             LIMIT ?2",
        )?;
        let top_elements = stmt
            .query_map(rusqlite::params![cutoff, TOP_ELEMENTS_LIMIT as i64], |row| {
                Ok(ElementCount {
                    element: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(MetricsSnapshot {
            active_users: active_users as u64,
            events_per_min: window_events as f64 / window_minutes,
            avg_duration: avg_duration.unwrap_or(0.0),
            top_elements,
        })
    }
}
