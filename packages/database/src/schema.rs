//! Connection setup, schema and shared helpers for the quakewatch `DuckDB`.
//!
//! One file holds every table: `events`, `stat_snapshots`, `zones`
//! (versioned), `forecasts` and a `_meta` key/value table whose
//! `current_zone_version` entry points at the live zone set.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::Connection;

use crate::DbError;

/// `_meta` key holding the version number of the current zone set.
pub const CURRENT_ZONE_VERSION_KEY: &str = "current_zone_version";

/// Format used when binding timestamps as text parameters.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format used when binding dates as text parameters.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Opens (or creates) the quakewatch `DuckDB` database and ensures the
/// schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;

    conn.execute_batch(
        "SET threads = 4;
         SET memory_limit = '512MB';",
    )?;

    create_schema(&conn)?;

    Ok(conn)
}

/// Opens a throwaway in-memory database with the schema applied.
///
/// # Errors
///
/// Returns [`DbError`] if the schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Creates every table if it does not already exist.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id TEXT NOT NULL PRIMARY KEY,
            place TEXT,
            magnitude DOUBLE,
            depth_km DOUBLE,
            latitude DOUBLE,
            longitude DOUBLE,
            occurred_at TIMESTAMP,
            zone_id INTEGER,
            mag_type TEXT,
            status TEXT,
            tsunami BOOLEAN,
            url TEXT,
            updated_at TIMESTAMP
        );

        CREATE SEQUENCE IF NOT EXISTS stat_snapshots_seq;

        CREATE TABLE IF NOT EXISTS stat_snapshots (
            id BIGINT NOT NULL DEFAULT nextval('stat_snapshots_seq') PRIMARY KEY,
            captured_at TIMESTAMP NOT NULL,
            window_start TIMESTAMP NOT NULL,
            window_end TIMESTAMP NOT NULL,
            event_count BIGINT NOT NULL,
            avg_magnitude DOUBLE,
            max_magnitude DOUBLE,
            min_magnitude DOUBLE,
            avg_depth DOUBLE,
            max_depth DOUBLE,
            strongest_event_id TEXT,
            hist_below_3 BIGINT NOT NULL,
            hist_3_to_4 BIGINT NOT NULL,
            hist_4_to_5 BIGINT NOT NULL,
            hist_5_to_6 BIGINT NOT NULL,
            hist_at_least_6 BIGINT NOT NULL,
            trend_direction TEXT NOT NULL,
            trend_percent DOUBLE NOT NULL,
            activity_label TEXT NOT NULL,
            pressure_label TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS zones (
            version BIGINT NOT NULL,
            zone_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            centroid_lat DOUBLE NOT NULL,
            centroid_lon DOUBLE NOT NULL,
            risk_level TEXT NOT NULL,
            event_count BIGINT NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (version, zone_id)
        );

        CREATE SEQUENCE IF NOT EXISTS forecasts_seq;

        CREATE TABLE IF NOT EXISTS forecasts (
            id BIGINT NOT NULL DEFAULT nextval('forecasts_seq') PRIMARY KEY,
            kind TEXT NOT NULL,
            metric TEXT,
            value DOUBLE,
            label TEXT,
            confidence DOUBLE NOT NULL,
            target_date DATE NOT NULL,
            model_name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Runs `f` inside a transaction, committing on success and rolling back
/// on any error.
///
/// # Errors
///
/// Returns whatever `f` returns, or [`DbError`] if the transaction itself
/// cannot be started or committed.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    let result = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT")?;
        Ok(value)
    });

    if result.is_err()
        && let Err(e) = conn.execute_batch("ROLLBACK")
    {
        log::warn!("Rollback failed: {e}");
    }

    result
}

/// Formats a timestamp for binding as a text parameter.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a `DuckDB` timestamp text representation into a UTC `DateTime`.
///
/// `DuckDB`'s `VARCHAR` cast can produce several formats depending on the
/// stored precision:
/// - `2024-01-15 10:30:00` (no fractional seconds)
/// - `2024-01-15 10:30:00.123` (fractional seconds)
/// - `2024-01-15 10:30:00+00` (with timezone)
/// - `2024-01-15 10:30:00.123+00` (both)
///
/// This function tries them in order and returns the first successful parse.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }

    // No timezone: stored values are always UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    log::warn!("Failed to parse timestamp: {s:?}");
    None
}

/// Parses a required timestamp column, failing the read when it is
/// unparsable.
pub(crate) fn require_timestamp(column: &str, s: &str) -> Result<DateTime<Utc>, DbError> {
    parse_timestamp(s).ok_or_else(|| DbError::Conversion {
        message: format!("invalid {column} timestamp: {s:?}"),
    })
}

/// Parses a `DuckDB` date text representation.
pub(crate) fn parse_date(column: &str, s: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| DbError::Conversion {
        message: format!("invalid {column} date {s:?}: {e}"),
    })
}

/// Parses a text column into an enum through its `FromStr` impl.
pub(crate) fn parse_enum<T: std::str::FromStr>(column: &str, s: &str) -> Result<T, DbError> {
    s.parse().map_err(|_| DbError::Conversion {
        message: format!("unknown {column} value: {s:?}"),
    })
}

/// Converts a stored `BIGINT` count back into a `u64`.
pub(crate) fn to_count(column: &str, value: i64) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("negative {column}: {value}"),
    })
}

/// Converts a count into a `BIGINT` parameter.
pub(crate) fn from_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    let result = stmt.query_row([key], |row| row.get(0));
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

/// Returns the current zone-set version, `0` when no zones were ever
/// written.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the stored value is corrupt.
pub fn current_zone_version(conn: &Connection) -> Result<u64, DbError> {
    get_meta(conn, CURRENT_ZONE_VERSION_KEY)?.map_or(Ok(0), |v| {
        v.parse().map_err(|_| DbError::Conversion {
            message: format!("invalid {CURRENT_ZONE_VERSION_KEY}: {v:?}"),
        })
    })
}
