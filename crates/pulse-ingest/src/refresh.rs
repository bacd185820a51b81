//! Periodic rebuild of the engagement view.

use std::time::Duration;

use chrono::Utc;
use pulse_core::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::processor::shutdown_signalled;
use crate::store::{EventStore, RefreshReport};

/// Default time between engagement view rebuilds.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Rebuilds the engagement view on a fixed interval.
///
/// The view is at most one interval plus one rebuild old.
pub struct ViewRefresher {
    store: EventStore,
    interval: Duration,
}

impl ViewRefresher {
    pub fn new(store: EventStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Rebuild once, recording metrics.
    pub fn refresh_now(&self) -> crate::Result<RefreshReport> {
        match self.store.refresh_engagement(Utc::now()) {
            Ok(report) => {
                metrics::increment("engagement_refresh_total", 1);
                metrics::set_gauge("engagement_view_users", report.users as f64);
                info!(users = report.users, "Refreshed engagement view");
                Ok(report)
            }
            Err(e) => {
                metrics::increment("engagement_refresh_errors_total", 1);
                Err(e)
            }
        }
    }

    /// Refresh on every tick until `shutdown` flips to `true`.
    ///
    /// The first tick fires immediately. Failures are logged and the next
    /// tick tries again.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_now() {
                            warn!(error = %e, "Engagement view refresh failed");
                        }
                    }
                }
            }

            info!("View refresher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::event;

    #[test]
    fn test_refresh_now_rebuilds_view() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&event("u1", "btn1", 1.0, Utc::now())).unwrap();

        let report = ViewRefresher::new(store.clone(), DEFAULT_REFRESH_INTERVAL)
            .refresh_now()
            .unwrap();

        assert_eq!(report.users, 1);
        assert_eq!(store.engagement().unwrap().users.len(), 1);
    }

    #[test]
    fn test_refresh_now_reports_store_errors() {
        let store = EventStore::from_connection(rusqlite::Connection::open_in_memory().unwrap());
        assert!(ViewRefresher::new(store, DEFAULT_REFRESH_INTERVAL).refresh_now().is_err());
    }

    #[tokio::test]
    async fn test_spawned_refresher_runs_until_shutdown() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&event("u1", "btn1", 1.0, Utc::now())).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = ViewRefresher::new(store.clone(), Duration::from_millis(20)).spawn(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.engagement().unwrap().refreshed_at.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("view was never refreshed");

        // Later ticks pick up new events
        store.insert_event(&event("u2", "btn1", 1.0, Utc::now())).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.engagement().unwrap().users.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("view did not pick up the new user");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("refresher did not stop")
            .unwrap();
    }
}
