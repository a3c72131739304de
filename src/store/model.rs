//! Persisted entities.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Storage format for timestamps (local processing time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current local time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    parse_timestamp(&format_timestamp(now))
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Unreadable values sort first.
pub fn parse_timestamp(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .unwrap_or(NaiveDateTime::MIN)
}

/// A known user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub phone: Option<String>,
    pub accepted_terms: bool,
    /// Set iff `accepted_terms` is true.
    pub accepted_at: Option<NaiveDateTime>,
}

impl User {
    /// Registered users have a non-empty phone on file.
    pub fn is_registered(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

/// A driver's offer of transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    pub id: i64,
    pub driver_id: i64,
    /// Driver display name at creation time. Not refreshed on rename.
    pub driver_username: String,
    pub from_location: String,
    pub to_location: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub seats: i64,
    pub is_active: bool,
    pub last_check: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// An immutable log entry of a past search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: i64,
    pub passenger_id: i64,
    pub from_location: String,
    pub to_location: String,
    /// `YYYY-MM-DD`
    pub search_date: String,
    pub created_at: NaiveDateTime,
}

/// The `(from, to, date)` key a search matches on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchTriple {
    pub from_location: String,
    pub to_location: String,
    pub date: String,
}

/// Contact details surfaced to a passenger once a match is found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverContact {
    pub username: String,
    pub phone: Option<String>,
}

/// Aggregate counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_users: i64,
    pub registered_users: i64,
    pub accepted_terms: i64,
    pub active_rides: i64,
    pub total_rides: i64,
    pub total_searches: i64,
    pub unique_searchers: i64,
    pub active_drivers: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip() {
        let ts = parse_timestamp("2024-12-31 23:59:58");
        assert_eq!(format_timestamp(ts), "2024-12-31 23:59:58");
    }

    #[test]
    fn garbage_timestamp_sorts_first() {
        assert_eq!(parse_timestamp("yesterday"), NaiveDateTime::MIN);
    }

    #[test]
    fn blank_phone_is_not_registered() {
        let mut user = User {
            user_id: 1,
            username: "anna".into(),
            phone: Some("  ".into()),
            accepted_terms: true,
            accepted_at: None,
        };
        assert!(!user.is_registered());
        user.phone = Some("79123456789".into());
        assert!(user.is_registered());
    }
}
