//! libSQL backend — async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    DATE_FORMAT, DriverContact, Ride, SearchRecord, SearchTriple, Stats, User, format_timestamp,
    now_local, parse_timestamp,
};
use crate::store::traits::RecordStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn count(&self, sql: &str) -> i64 {
        let result: Result<i64, libsql::Error> = async {
            let mut rows = self.conn().query(sql, ()).await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0),
                None => Ok(0),
            }
        }
        .await;
        result.unwrap_or_else(|e| {
            warn!(error = %e, sql, "Count query failed");
            0
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Log a failed read and hand back an empty result.
fn or_empty<T: Default>(op: &str, result: Result<T, DatabaseError>) -> T {
    result.unwrap_or_else(|e| {
        warn!(op, error = %e, "Read failed, returning empty result");
        T::default()
    })
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const USER_COLUMNS: &str = "user_id, username, phone, accepted_terms, accepted_at";

const RIDE_COLUMNS: &str = "id, driver_id, driver_username, from_location, to_location, date, time, seats, is_active, last_check, created_at";

const SEARCH_COLUMNS: &str =
    "id, passenger_id, from_location, to_location, search_date, created_at";

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    let user_id: i64 = row.get(0)?;
    let username: String = row
        .get::<String>(1)
        .unwrap_or_else(|_| format!("user_{user_id}"));
    let accepted_terms = row.get::<i64>(3).unwrap_or(0) != 0;
    let accepted_at = row
        .get::<String>(4)
        .ok()
        .filter(|_| accepted_terms)
        .map(|s| parse_timestamp(&s));
    Ok(User {
        user_id,
        username,
        phone: row.get::<String>(2).ok(),
        accepted_terms,
        accepted_at,
    })
}

/// Map a libsql Row to a Ride. Column order matches RIDE_COLUMNS.
fn row_to_ride(row: &libsql::Row) -> Result<Ride, libsql::Error> {
    let driver_id: i64 = row.get(1)?;
    let created_at = row
        .get::<String>(10)
        .map(|s| parse_timestamp(&s))
        .unwrap_or(NaiveDateTime::MIN);
    Ok(Ride {
        id: row.get(0)?,
        driver_id,
        driver_username: row
            .get::<String>(2)
            .unwrap_or_else(|_| format!("user_{driver_id}")),
        from_location: row.get(3)?,
        to_location: row.get(4)?,
        date: row.get(5)?,
        time: row.get(6)?,
        seats: row.get(7)?,
        is_active: row.get::<i64>(8).unwrap_or(1) != 0,
        last_check: row
            .get::<String>(9)
            .map(|s| parse_timestamp(&s))
            .unwrap_or(created_at),
        created_at,
    })
}

/// Map a libsql Row to a SearchRecord. Column order matches SEARCH_COLUMNS.
fn row_to_search(row: &libsql::Row) -> Result<SearchRecord, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(SearchRecord {
        id: row.get(0)?,
        passenger_id: row.get(1)?,
        from_location: row.get(2)?,
        to_location: row.get(3)?,
        search_date: row.get(4)?,
        created_at: parse_timestamp(&created_str),
    })
}

fn row_to_triple(row: &libsql::Row) -> Result<SearchTriple, libsql::Error> {
    Ok(SearchTriple {
        from_location: row.get(0)?,
        to_location: row.get(1)?,
        date: row.get(2)?,
    })
}

async fn collect_rides(mut rows: libsql::Rows, op: &str) -> Result<Vec<Ride>, DatabaseError> {
    let mut rides = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        rides.push(row_to_ride(&row).map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?);
    }
    Ok(rides)
}

async fn collect_searches(
    mut rows: libsql::Rows,
    op: &str,
) -> Result<Vec<SearchRecord>, DatabaseError> {
    let mut searches = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        searches
            .push(row_to_search(&row).map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?);
    }
    Ok(searches)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(
        &self,
        user_id: i64,
        username: &str,
        phone: Option<&str>,
        accepted_terms: bool,
    ) -> Result<(), DatabaseError> {
        let accepted_at = accepted_terms.then(|| format_timestamp(now_local()));
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO users (user_id, username, phone, accepted_terms, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    username,
                    opt_text(phone),
                    accepted_terms as i64,
                    opt_text(accepted_at.as_deref())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;

        debug!(user_id, registered = phone.is_some(), "User saved");
        Ok(())
    }

    async fn set_accepted_terms(&self, user_id: i64, accepted: bool) -> Result<(), DatabaseError> {
        let accepted_at = accepted.then(|| format_timestamp(now_local()));
        let count = self
            .conn()
            .execute(
                "UPDATE users SET accepted_terms = ?1, accepted_at = ?2 WHERE user_id = ?3",
                params![accepted as i64, opt_text(accepted_at.as_deref()), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_accepted_terms: {e}")))?;

        if count == 0 {
            warn!(user_id, "set_accepted_terms: user not found");
        }
        Ok(())
    }

    async fn get_user(&self, user_id: i64) -> Option<User> {
        or_empty("get_user", self.fetch_user(user_id).await)
    }

    async fn list_all_users(&self) -> Vec<User> {
        let result = async {
            let mut rows = self
                .conn()
                .query(
                    &format!("SELECT {USER_COLUMNS} FROM users ORDER BY user_id DESC"),
                    (),
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_all_users: {e}")))?;
            let mut users = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("list_all_users: {e}")))?
            {
                users.push(
                    row_to_user(&row)
                        .map_err(|e| DatabaseError::Query(format!("list_all_users: {e}")))?,
                );
            }
            Ok::<_, DatabaseError>(users)
        }
        .await;
        or_empty("list_all_users", result)
    }

    // ── Rides ───────────────────────────────────────────────────────

    async fn create_ride(
        &self,
        driver_id: i64,
        from: &str,
        to: &str,
        date: &str,
        time: &str,
        seats: i64,
    ) -> Result<i64, DatabaseError> {
        let driver_username = self
            .get_user(driver_id)
            .await
            .map(|u| u.username)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("user_{driver_id}"));
        let now = format_timestamp(now_local());

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO rides (driver_id, driver_username, from_location, to_location, date, time, seats, is_active, last_check, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
                 RETURNING id",
                params![driver_id, driver_username, from, to, date, time, seats, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_ride: {e}")))?;

        let ride_id = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("create_ride: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "create_ride: insert returned no id".into(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("create_ride: {e}"))),
        };

        info!(ride_id, driver_id, from, to, date, time, seats, "Ride created");
        Ok(ride_id)
    }

    async fn get_ride(&self, ride_id: i64) -> Option<Ride> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = ?1"),
                    params![ride_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_ride: {e}")))?;
            Ok::<_, DatabaseError>(collect_rides(rows, "get_ride").await?.into_iter().next())
        }
        .await;
        or_empty("get_ride", result)
    }

    async fn list_active_rides_for_driver(&self, driver_id: i64) -> Vec<Ride> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {RIDE_COLUMNS} FROM rides
                         WHERE driver_id = ?1 AND is_active = 1
                         ORDER BY date, time"
                    ),
                    params![driver_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_active_rides_for_driver: {e}")))?;
            collect_rides(rows, "list_active_rides_for_driver").await
        }
        .await;
        or_empty("list_active_rides_for_driver", result)
    }

    async fn list_all_active_rides(&self) -> Vec<Ride> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {RIDE_COLUMNS} FROM rides
                         WHERE is_active = 1
                         ORDER BY last_check ASC, id ASC"
                    ),
                    (),
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_all_active_rides: {e}")))?;
            collect_rides(rows, "list_all_active_rides").await
        }
        .await;
        or_empty("list_all_active_rides", result)
    }

    async fn set_ride_active(&self, ride_id: i64, active: bool) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE rides SET is_active = ?1, last_check = ?2 WHERE id = ?3",
                params![active as i64, format_timestamp(now_local()), ride_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_ride_active: {e}")))?;

        debug!(ride_id, active, "Ride status updated");
        Ok(count > 0)
    }

    async fn delete_ride(&self, ride_id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM rides WHERE id = ?1", params![ride_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_ride: {e}")))?;

        if count > 0 {
            info!(ride_id, "Ride deleted");
        }
        Ok(count > 0)
    }

    async fn get_driver_contact(&self, ride_id: i64) -> Option<DriverContact> {
        let result = async {
            let mut rows = self
                .conn()
                .query(
                    "SELECT r.driver_id, COALESCE(u.username, r.driver_username), u.phone
                     FROM rides r LEFT JOIN users u ON r.driver_id = u.user_id
                     WHERE r.id = ?1",
                    params![ride_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_driver_contact: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => {
                    let driver_id: i64 = row.get(0).unwrap_or_default();
                    Ok(Some(DriverContact {
                        username: row
                            .get::<String>(1)
                            .unwrap_or_else(|_| format!("user_{driver_id}")),
                        phone: row.get::<String>(2).ok(),
                    }))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(DatabaseError::Query(format!("get_driver_contact: {e}"))),
            }
        }
        .await;
        or_empty("get_driver_contact", result)
    }

    async fn find_open_rides(&self, from: &str, to: &str, date: &str) -> Vec<Ride> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {RIDE_COLUMNS} FROM rides
                         WHERE from_location = ?1 AND to_location = ?2 AND date = ?3
                           AND is_active = 1 AND seats > 0
                         ORDER BY time, id"
                    ),
                    params![from, to, date],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("find_open_rides: {e}")))?;
            collect_rides(rows, "find_open_rides").await
        }
        .await;
        or_empty("find_open_rides", result)
    }

    async fn expire_rides_before(
        &self,
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE rides SET is_active = 0, last_check = ?1 WHERE is_active = 1 AND date < ?2",
                params![
                    format_timestamp(now),
                    today.format(DATE_FORMAT).to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("expire_rides_before: {e}")))?;
        Ok(count as usize)
    }

    async fn purge_inactive_created_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM rides WHERE is_active = 0 AND created_at < ?1",
                params![format_timestamp(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_inactive_created_before: {e}")))?;
        Ok(count as usize)
    }

    // ── Search history ──────────────────────────────────────────────

    async fn record_search(
        &self,
        passenger_id: i64,
        from: &str,
        to: &str,
        date: &str,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO passenger_searches (passenger_id, from_location, to_location, search_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                params![passenger_id, from, to, date, format_timestamp(now_local())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_search: {e}")))?;

        let search_id = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("record_search: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "record_search: insert returned no id".into(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("record_search: {e}"))),
        };

        debug!(search_id, passenger_id, from, to, date, "Search recorded");
        Ok(search_id)
    }

    async fn list_recent_searches(&self, passenger_id: i64, limit: usize) -> Vec<SearchRecord> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {SEARCH_COLUMNS} FROM passenger_searches
                         WHERE passenger_id = ?1
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?2"
                    ),
                    params![passenger_id, limit as i64],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_recent_searches: {e}")))?;
            collect_searches(rows, "list_recent_searches").await
        }
        .await;
        or_empty("list_recent_searches", result)
    }

    async fn get_search(&self, search_id: i64, passenger_id: i64) -> Option<SearchRecord> {
        let result = async {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {SEARCH_COLUMNS} FROM passenger_searches
                         WHERE id = ?1 AND passenger_id = ?2"
                    ),
                    params![search_id, passenger_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_search: {e}")))?;
            Ok::<_, DatabaseError>(collect_searches(rows, "get_search").await?.into_iter().next())
        }
        .await;
        or_empty("get_search", result)
    }

    async fn list_recent_search_triples(
        &self,
        passenger_id: i64,
        limit: usize,
    ) -> Vec<SearchTriple> {
        let result = async {
            let mut rows = self
                .conn()
                .query(
                    "SELECT from_location, to_location, search_date
                     FROM passenger_searches
                     WHERE passenger_id = ?1
                     GROUP BY from_location, to_location, search_date
                     ORDER BY MAX(id) DESC
                     LIMIT ?2",
                    params![passenger_id, limit as i64],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_recent_search_triples: {e}")))?;

            let mut triples = Vec::new();
            while let Some(row) = rows.next().await.map_err(|e| {
                DatabaseError::Query(format!("list_recent_search_triples: {e}"))
            })? {
                triples.push(row_to_triple(&row).map_err(|e| {
                    DatabaseError::Query(format!("list_recent_search_triples: {e}"))
                })?);
            }
            Ok::<_, DatabaseError>(triples)
        }
        .await;
        or_empty("list_recent_search_triples", result)
    }

    // ── Admin ───────────────────────────────────────────────────────

    async fn stats(&self) -> Stats {
        Stats {
            total_users: self.count("SELECT COUNT(*) FROM users").await,
            registered_users: self
                .count("SELECT COUNT(*) FROM users WHERE phone IS NOT NULL AND phone != ''")
                .await,
            accepted_terms: self
                .count("SELECT COUNT(*) FROM users WHERE accepted_terms = 1")
                .await,
            active_rides: self
                .count("SELECT COUNT(*) FROM rides WHERE is_active = 1")
                .await,
            total_rides: self.count("SELECT COUNT(*) FROM rides").await,
            total_searches: self.count("SELECT COUNT(*) FROM passenger_searches").await,
            unique_searchers: self
                .count("SELECT COUNT(DISTINCT passenger_id) FROM passenger_searches")
                .await,
            active_drivers: self
                .count("SELECT COUNT(DISTINCT driver_id) FROM rides WHERE is_active = 1")
                .await,
        }
    }
}
