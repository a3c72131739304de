//! `RecordStore` trait — single async interface for all persistence.
//!
//! Every operation is a single, immediately committed statement. Writes
//! surface faults as [`DatabaseError`]; reads log and degrade to an empty or
//! absent result, so callers treat "no data" and "fetch failed" alike.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::DatabaseError;
use crate::store::model::{DriverContact, Ride, SearchRecord, SearchTriple, Stats, User};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Create or fully replace a user. `accepted_at` is stamped iff
    /// `accepted_terms` is true.
    async fn upsert_user(
        &self,
        user_id: i64,
        username: &str,
        phone: Option<&str>,
        accepted_terms: bool,
    ) -> Result<(), DatabaseError>;

    /// Update only the terms fields. A missing user is logged, not an error.
    async fn set_accepted_terms(&self, user_id: i64, accepted: bool) -> Result<(), DatabaseError>;

    async fn get_user(&self, user_id: i64) -> Option<User>;

    /// All users, most recent id first.
    async fn list_all_users(&self) -> Vec<User>;

    // ── Rides ───────────────────────────────────────────────────────

    /// Insert an active ride and return its id. The driver name is resolved
    /// from the user record, falling back to `user_{id}`.
    async fn create_ride(
        &self,
        driver_id: i64,
        from: &str,
        to: &str,
        date: &str,
        time: &str,
        seats: i64,
    ) -> Result<i64, DatabaseError>;

    async fn get_ride(&self, ride_id: i64) -> Option<Ride>;

    /// Active rides of one driver, ordered by date then time.
    async fn list_active_rides_for_driver(&self, driver_id: i64) -> Vec<Ride>;

    /// Every active ride, oldest `last_check` first.
    async fn list_all_active_rides(&self) -> Vec<Ride>;

    /// Set the active flag and refresh `last_check`. Returns whether a row
    /// was touched.
    async fn set_ride_active(&self, ride_id: i64, active: bool) -> Result<bool, DatabaseError>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete_ride(&self, ride_id: i64) -> Result<bool, DatabaseError>;

    /// Driver name and phone for a ride.
    async fn get_driver_contact(&self, ride_id: i64) -> Option<DriverContact>;

    /// Active rides with free seats matching all three fields exactly,
    /// ordered by time.
    async fn find_open_rides(&self, from: &str, to: &str, date: &str) -> Vec<Ride>;

    /// Deactivate active rides dated before `today`, stamping `last_check`
    /// with `now`. Returns the number of rides expired.
    async fn expire_rides_before(
        &self,
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<usize, DatabaseError>;

    /// Delete inactive rides created before `cutoff`.
    async fn purge_inactive_created_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> Result<usize, DatabaseError>;

    // ── Search history ──────────────────────────────────────────────

    /// Append a search record and return its id.
    async fn record_search(
        &self,
        passenger_id: i64,
        from: &str,
        to: &str,
        date: &str,
    ) -> Result<i64, DatabaseError>;

    /// Most recent searches first.
    async fn list_recent_searches(&self, passenger_id: i64, limit: usize) -> Vec<SearchRecord>;

    /// A single search, only if it belongs to `passenger_id`.
    async fn get_search(&self, search_id: i64, passenger_id: i64) -> Option<SearchRecord>;

    /// Distinct `(from, to, date)` triples, most recently searched first.
    async fn list_recent_search_triples(&self, passenger_id: i64, limit: usize)
    -> Vec<SearchTriple>;

    // ── Admin ───────────────────────────────────────────────────────

    async fn stats(&self) -> Stats;
}
