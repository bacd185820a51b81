//! Per-user engagement view.
//!
//! `user_engagement` is a point-in-time snapshot of `events`: it is rebuilt
//! only by [`EventStore::refresh_engagement`] and goes stale as soon as new
//! events are inserted. Readers get the `refreshed_at` of the snapshot so the
//! staleness is visible.

use chrono::{DateTime, Utc};
use pulse_core::timestamp_from_millis;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::{ENGAGEMENT_VIEW, EventStore};
use crate::Result;

/// Aggregate for one user as of the last refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRow {
    pub user_id: String,
    pub total_events: u64,
    pub total_duration: f64,
    /// Distinct UTC calendar days with at least one event.
    pub active_days: u64,
}

/// Contents of the engagement view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementView {
    /// `None` until the first refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
    pub users: Vec<EngagementRow>,
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshReport {
    pub users: u64,
    pub refreshed_at: DateTime<Utc>,
}

impl EventStore {
    /// Rebuild the engagement view from `events`.
    ///
    /// Runs as one transaction, so readers see either the previous snapshot
    /// or the new one.
    pub fn refresh_engagement(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM user_engagement", [])?;
        let users = tx.execute(
            "INSERT INTO user_engagement (user_id, total_events, total_duration, active_days)
             SELECT
                 user_id,
                 COUNT(*),
                 COALESCE(SUM(duration), 0),
                 COUNT(DISTINCT date(timestamp / 1000, 'unixepoch'))
             FROM events
             GROUP BY user_id",
            [],
        )?;
        tx.execute(
            "INSERT INTO view_refresh (view_name, refreshed_at, row_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(view_name) DO UPDATE SET
                 refreshed_at = excluded.refreshed_at,
                 row_count = excluded.row_count",
            params![ENGAGEMENT_VIEW, now.timestamp_millis(), users as i64],
        )?;
        tx.commit()?;

        Ok(RefreshReport {
            users: users as u64,
            refreshed_at: now,
        })
    }

    /// When the engagement view was last rebuilt.
    pub fn engagement_refreshed_at(&self) -> Result<Option<DateTime<Utc>>> {
        refreshed_at(&self.conn.lock())
    }

    /// Read the engagement view, most active users first.
    ///
    /// The rows and `refreshed_at` are read under one lock, so they always
    /// describe the same snapshot.
    pub fn engagement(&self) -> Result<EngagementView> {
        let conn = self.conn.lock();
        let refreshed_at = refreshed_at(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT user_id, total_events, total_duration, active_days
             FROM user_engagement
             ORDER BY total_events DESC, user_id ASC",
        )?;
        let users = stmt
            .query_map([], |row| {
                Ok(EngagementRow {
                    user_id: row.get(0)?,
                    total_events: row.get::<_, i64>(1)? as u64,
                    total_duration: row.get(2)?,
                    active_days: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(EngagementView {
            refreshed_at,
            users,
        })
    }
}

fn refreshed_at(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = conn
        .query_row(
            "SELECT refreshed_at FROM view_refresh WHERE view_name = ?1",
            [ENGAGEMENT_VIEW],
            |row| row.get(0),
        )
        .optional()?;

    Ok(millis.map(timestamp_from_millis).transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::event;
    use chrono::{Duration, TimeZone};

    fn day(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_view_empty_before_first_refresh() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&event("u1", "btn1", 1.0, day(1, 9))).unwrap();

        let view = store.engagement().unwrap();
        assert_eq!(view.refreshed_at, None);
        assert!(view.users.is_empty());
    }

    #[test]
    fn test_refresh_aggregates_per_user() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&event("u1", "btn1", 1.5, day(1, 9))).unwrap();
        store.insert_event(&event("u1", "btn2", 2.5, day(1, 18))).unwrap();
        store.insert_event(&event("u1", "btn1", 0.0, day(2, 9))).unwrap();
        store.insert_event(&event("u2", "btn1", 0.0, day(3, 9))).unwrap();

        let report = store.refresh_engagement(day(4, 0)).unwrap();
        assert_eq!(report.users, 2);

        let view = store.engagement().unwrap();
        assert_eq!(view.refreshed_at, Some(day(4, 0)));
        assert_eq!(
            view.users,
            vec![
                EngagementRow {
                    user_id: "u1".to_string(),
                    total_events: 3,
                    total_duration: 4.0,
                    active_days: 2,
                },
                EngagementRow {
                    user_id: "u2".to_string(),
                    total_events: 1,
                    total_duration: 0.0,
                    active_days: 1,
                },
            ]
        );
    }

    #[test]
    fn test_view_is_stale_until_next_refresh() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&event("u1", "btn1", 1.0, day(1, 9))).unwrap();
        let first = day(1, 10);
        store.refresh_engagement(first).unwrap();

        // New events are invisible to the view
        store.insert_event(&event("u1", "btn1", 1.0, day(1, 11))).unwrap();
        store.insert_event(&event("u3", "btn1", 1.0, day(1, 11))).unwrap();
        let stale = store.engagement().unwrap();
        assert_eq!(stale.refreshed_at, Some(first));
        assert_eq!(stale.users.len(), 1);
        assert_eq!(stale.users[0].total_events, 1);

        let second = first + Duration::hours(2);
        store.refresh_engagement(second).unwrap();
        let fresh = store.engagement().unwrap();
        assert_eq!(fresh.refreshed_at, Some(second));
        assert_eq!(fresh.users.len(), 2);
        assert_eq!(fresh.users[0].total_events, 2);
    }

    #[test]
    fn test_concurrent_reads_see_matching_refresh_time() {
        let store = EventStore::open_in_memory().unwrap();
        let base = day(1, 0);

        // Refresh i happens after user i is inserted, so a consistent read
        // at refreshed_at = base + i seconds sees exactly i users.
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..=50i64 {
                    store
                        .insert_event(&event(&format!("u{i}"), "btn1", 1.0, day(1, 9)))
                        .unwrap();
                    store.refresh_engagement(base + Duration::seconds(i)).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let view = store.engagement().unwrap();
            match view.refreshed_at {
                Some(at) => assert_eq!(view.users.len() as i64, (at - base).num_seconds()),
                None => assert!(view.users.is_empty()),
            }
        }
        writer.join().unwrap();

        let view = store.engagement().unwrap();
        assert_eq!(view.refreshed_at, Some(base + Duration::seconds(50)));
        assert_eq!(view.users.len(), 50);
    }
}
