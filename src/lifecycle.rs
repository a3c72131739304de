//! Periodic ride maintenance.
//!
//! `Active -> Expired` once the ride date is before today (local calendar),
//! `Inactive -> Purged` once the ride was *created* more than seven days ago.
//! Purge is gated on creation age, not on how long the ride has been
//! inactive. Both passes only narrow the active set and are idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::DatabaseError;
use crate::store::RecordStore;
use crate::store::model::now_local;

/// Inactive rides created longer ago than this are deleted.
pub const PURGE_GRACE_DAYS: i64 = 7;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
}

pub struct LifecycleSweeper {
    store: Arc<dyn RecordStore>,
}

impl LifecycleSweeper {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Sweep against the current local time.
    pub async fn run_once(&self) -> Result<SweepReport, DatabaseError> {
        self.run_at(now_local()).await
    }

    /// Sweep as if the current local time were `now`.
    pub async fn run_at(&self, now: NaiveDateTime) -> Result<SweepReport, DatabaseError> {
        let expired = self.store.expire_rides_before(now.date(), now).await?;
        let cutoff = now - chrono::Duration::days(PURGE_GRACE_DAYS);
        let purged = self.store.purge_inactive_created_before(cutoff).await?;

        let report = SweepReport { expired, purged };
        if expired > 0 || purged > 0 {
            tracing::info!(expired, purged, "Ride sweep complete");
        } else {
            tracing::debug!("Ride sweep found nothing to do");
        }
        Ok(report)
    }
}

/// Spawn the background sweep task. The first sweep runs one `period`
/// after spawning; callers run an initial sweep themselves.
pub fn spawn_sweep_task(
    sweeper: Arc<LifecycleSweeper>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.run_once().await {
                tracing::error!(error = %e, "Ride sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn RecordStore>, LifecycleSweeper) {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sweeper = LifecycleSweeper::new(store.clone());
        (store, sweeper)
    }

    #[tokio::test]
    async fn expires_past_rides_once() {
        let (store, sweeper) = setup().await;
        let past = store
            .create_ride(1, "A", "B", "2020-01-01", "10:00", 2)
            .await
            .unwrap();
        let future = store
            .create_ride(1, "A", "B", "2999-12-31", "10:00", 2)
            .await
            .unwrap();

        let first = sweeper.run_once().await.unwrap();
        assert_eq!(first.expired, 1);
        assert!(!store.get_ride(past).await.unwrap().is_active);
        assert!(store.get_ride(future).await.unwrap().is_active);

        let second = sweeper.run_once().await.unwrap();
        assert_eq!(second, SweepReport::default());
    }

    #[tokio::test]
    async fn todays_ride_is_not_expired() {
        let (store, sweeper) = setup().await;
        let now = now_local();
        let today = now.date().format("%Y-%m-%d").to_string();
        let id = store
            .create_ride(1, "A", "B", &today, "00:00", 1)
            .await
            .unwrap();

        sweeper.run_at(now).await.unwrap();
        assert!(store.get_ride(id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn purges_inactive_rides_created_over_a_week_ago() {
        let (store, sweeper) = setup().await;
        let id = store
            .create_ride(1, "A", "B", "2999-12-31", "10:00", 2)
            .await
            .unwrap();
        // Deactivated "just now" relative to the sweep; only creation age counts.
        store.set_ride_active(id, false).await.unwrap();

        let report = sweeper
            .run_at(now_local() + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(report.purged, 1);
        assert!(store.get_ride(id).await.is_none());
    }

    #[tokio::test]
    async fn keeps_recently_created_inactive_rides() {
        let (store, sweeper) = setup().await;
        let id = store
            .create_ride(1, "A", "B", "2999-12-31", "10:00", 2)
            .await
            .unwrap();
        store.set_ride_active(id, false).await.unwrap();

        let report = sweeper
            .run_at(now_local() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(report.purged, 0);
        assert!(store.get_ride(id).await.is_some());
    }

    #[tokio::test]
    async fn never_purges_active_rides() {
        let (store, sweeper) = setup().await;
        let id = store
            .create_ride(1, "A", "B", "2999-12-31", "10:00", 2)
            .await
            .unwrap();

        sweeper
            .run_at(now_local() + Duration::days(30))
            .await
            .unwrap();
        assert!(store.get_ride(id).await.unwrap().is_active);
    }
}
