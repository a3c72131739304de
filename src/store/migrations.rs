//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a legacy DB (tables exist, no `_migrations` table),
//! missing columns are added in place and V1 is seeded without re-creating
//! tables.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                phone TEXT,
                accepted_terms INTEGER NOT NULL DEFAULT 0,
                accepted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS rides (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                driver_id INTEGER NOT NULL,
                driver_username TEXT,
                from_location TEXT NOT NULL,
                to_location TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                seats INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_check TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
            );

            CREATE TABLE IF NOT EXISTS passenger_searches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                passenger_id INTEGER NOT NULL,
                from_location TEXT NOT NULL,
                to_location TEXT NOT NULL,
                search_date TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
            );
        "#,
    },
    Migration {
        version: 2,
        name: "match_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_rides_route_date
                ON rides(from_location, to_location, date);
            CREATE INDEX IF NOT EXISTS idx_rides_driver ON rides(driver_id);
            CREATE INDEX IF NOT EXISTS idx_rides_active ON rides(is_active);
            CREATE INDEX IF NOT EXISTS idx_searches_passenger
                ON passenger_searches(passenger_id);
        "#,
    },
];

/// Columns added after the first release, as `(table, column, definition)`.
const LEGACY_COLUMNS: &[(&str, &str, &str)] = &[
    ("users", "accepted_terms", "INTEGER NOT NULL DEFAULT 0"),
    ("users", "accepted_at", "TEXT"),
    ("rides", "is_active", "INTEGER NOT NULL DEFAULT 1"),
    ("rides", "last_check", "TEXT"),
    ("rides", "created_at", "TEXT"),
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
/// Detects legacy databases (tables exist but no `_migrations` table),
/// upgrades their columns and seeds V1 without re-running schema DDL.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    if current_version == 0 && legacy_tables_exist(conn).await? {
        upgrade_legacy_schema(conn).await?;
        seed_version(conn, 1, "initial_schema").await?;
        tracing::info!("Legacy database detected — seeded migration V1");
    }

    let current_version = get_current_version(conn).await?;
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Bring a pre-versioning database up to the V1 layout.
async fn upgrade_legacy_schema(conn: &Connection) -> Result<(), DatabaseError> {
    // Tables that older databases may not have at all.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS passenger_searches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            passenger_id INTEGER NOT NULL,
            from_location TEXT NOT NULL,
            to_location TEXT NOT NULL,
            search_date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );",
    )
    .await
    .map_err(|e| {
        DatabaseError::Migration(format!("Failed to create search table on legacy DB: {e}"))
    })?;

    for (table, column, definition) in LEGACY_COLUMNS {
        if column_exists(conn, table, column).await? {
            continue;
        }
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!("Failed to add {table}.{column}: {e}"))
        })?;
        tracing::info!(table, column, "Added legacy column");
    }

    conn.execute_batch(
        "UPDATE rides SET is_active = 1 WHERE is_active IS NULL;
         UPDATE rides SET last_check = datetime('now', 'localtime') WHERE last_check IS NULL;
         UPDATE rides SET created_at = datetime('now', 'localtime') WHERE created_at IS NULL;",
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to back-fill legacy rides: {e}")))?;

    Ok(())
}

/// Whether `table` already has `column`.
async fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({table})"), ())
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to inspect {table}: {e}")))?;

    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read {table} columns: {e}")))?
    {
        let name: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("Failed to parse column name: {e}")))?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check if legacy tables (users, rides) already exist.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('users', 'rides')",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count == 2)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn count(conn: &Connection, sql: &str) -> i64 {
        let mut rows = conn.query(sql, ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get(0).unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["users", "rides", "passenger_searches", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }

        let indexes = count(
            &conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_rides_route_date'",
        )
        .await;
        assert_eq!(indexes, 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn legacy_db_is_upgraded_in_place() {
        let conn = test_conn().await;

        // Pre-versioning layout: no terms columns, no ride status columns.
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                phone TEXT
            );
            CREATE TABLE rides (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                driver_id INTEGER,
                driver_username TEXT,
                from_location TEXT,
                to_location TEXT,
                date TEXT,
                time TEXT,
                seats INTEGER
            );
            INSERT INTO rides (driver_id, driver_username, from_location, to_location, date, time, seats)
                VALUES (1, 'old', 'A', 'B', '2030-01-01', '10:00', 3);",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        assert_eq!(get_current_version(&conn).await.unwrap(), 2);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM rides WHERE is_active = 1 AND last_check IS NOT NULL").await,
            1
        );
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='passenger_searches'").await,
            1
        );

        conn.execute(
            "INSERT INTO users (user_id, username, phone, accepted_terms, accepted_at) VALUES (7, 'u', NULL, 1, '2026-01-01 00:00:00')",
            (),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn legacy_upgrade_skips_existing_columns() {
        let conn = test_conn().await;

        // Partially upgraded: terms columns already present.
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                phone TEXT,
                accepted_terms INTEGER NOT NULL DEFAULT 0,
                accepted_at TEXT
            );
            CREATE TABLE rides (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                driver_id INTEGER,
                driver_username TEXT,
                from_location TEXT,
                to_location TEXT,
                date TEXT,
                time TEXT,
                seats INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1
            );",
        )
        .await
        .unwrap();

        assert!(column_exists(&conn, "users", "accepted_terms").await.unwrap());
        assert!(!column_exists(&conn, "rides", "last_check").await.unwrap());

        upgrade_legacy_schema(&conn).await.unwrap();
        upgrade_legacy_schema(&conn).await.unwrap();

        for column in ["is_active", "last_check", "created_at"] {
            assert!(column_exists(&conn, "rides", column).await.unwrap(), "{column}");
        }
    }

    #[tokio::test]
    async fn legacy_upgrade_surfaces_alter_failures() {
        let conn = test_conn().await;

        // A view named like the table cannot be altered.
        conn.execute_batch(
            "CREATE TABLE base (user_id INTEGER PRIMARY KEY, username TEXT, phone TEXT);
             CREATE VIEW users AS SELECT * FROM base;
             CREATE TABLE rides (id INTEGER PRIMARY KEY AUTOINCREMENT, driver_id INTEGER);",
        )
        .await
        .unwrap();

        let err = upgrade_legacy_schema(&conn).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Migration(_)));
        assert!(err.to_string().contains("users.accepted_terms"));
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        let v1: i64 = row1.get(0).unwrap();
        let n1: String = row1.get(1).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(n1, "initial_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        let v2: i64 = row2.get(0).unwrap();
        let n2: String = row2.get(1).unwrap();
        assert_eq!(v2, 2);
        assert_eq!(n2, "match_indexes");
    }
}
