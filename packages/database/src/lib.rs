#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for quakewatch.
//!
//! A single database file holds the event table and the three analytics
//! result tables. The free functions in each module take a bare
//! [`duckdb::Connection`]; [`DuckDbStore`] wraps one connection behind a
//! mutex and implements every `quakewatch_store` trait on top of them.

pub mod events;
pub mod forecasts;
pub mod paths;
pub mod schema;
pub mod snapshots;
pub mod zones;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use quakewatch_event_models::{Event, EventQuery, Forecast, StatSnapshot, Zone};
use quakewatch_store::{
    ClusteringCommit, EventStore, ForecastStore, SnapshotStore, StoreError, ZoneStore,
};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A zone label targeted an event that does not exist.
    #[error("Unknown event id: {id}")]
    UnknownEvent {
        /// The missing event id.
        id: String,
    },

    /// The shared connection mutex was poisoned by a panicking holder.
    #[error("Database connection lock poisoned")]
    Poisoned,

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::UnknownEvent { id } => Self::UnknownEvent { id },
            DbError::Conversion { message } => Self::Conversion { message },
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}

/// Row counts reported by `quakewatch status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    /// Stored events.
    pub events: u64,
    /// Stored forecast rows, including error rows.
    pub forecasts: u64,
    /// Version of the current zone set.
    pub zone_version: u64,
}

/// A `DuckDB`-backed implementation of every store trait.
///
/// Holds a single connection; concurrent jobs serialize on the mutex.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        log::debug!("Opening quakewatch database at {}", path.display());
        Ok(Self::from_connection(schema::open(path)?))
    }

    /// Opens the database at the default `data/quakewatch.duckdb` path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&paths::default_db_path())
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(schema::open_in_memory()?))
    }

    /// Wraps an existing connection. The schema must already exist.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Returns row counts for a quick health check.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any count query fails.
    pub fn table_counts(&self) -> Result<TableCounts, DbError> {
        let conn = self.lock()?;
        Ok(TableCounts {
            events: events::get_event_count(&conn)?,
            forecasts: forecasts::get_forecast_count(&conn)?,
            zone_version: schema::current_zone_version(&conn)?,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }
}

impl EventStore for DuckDbStore {
    fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        Ok(events::query_events(&*self.lock()?, query)?)
    }

    fn upsert_events(&self, batch: &[Event]) -> Result<u64, StoreError> {
        Ok(events::upsert_events(&*self.lock()?, batch)?)
    }

    fn update_zone(&self, id: &str, zone_id: i32) -> Result<(), StoreError> {
        Ok(events::update_zone(&*self.lock()?, id, zone_id)?)
    }

    fn bulk_update_zones(&self, labels: &BTreeMap<String, i32>) -> Result<u64, StoreError> {
        Ok(events::bulk_update_zones(&*self.lock()?, labels)?)
    }

    fn purge_events(&self, before: Option<DateTime<Utc>>) -> Result<u64, StoreError> {
        Ok(events::purge_events(&*self.lock()?, before)?)
    }
}

impl SnapshotStore for DuckDbStore {
    fn append_snapshot(&self, snapshot: &StatSnapshot) -> Result<(), StoreError> {
        Ok(snapshots::append_snapshot(&*self.lock()?, snapshot)?)
    }

    fn latest_snapshot(&self) -> Result<Option<StatSnapshot>, StoreError> {
        Ok(snapshots::latest_snapshot(&*self.lock()?)?)
    }
}

impl ZoneStore for DuckDbStore {
    fn apply_clustering(
        &self,
        labels: &BTreeMap<String, i32>,
        zones: &[Zone],
    ) -> Result<ClusteringCommit, StoreError> {
        Ok(zones::apply_clustering(&*self.lock()?, labels, zones)?)
    }

    fn replace_zones(&self, zones: &[Zone]) -> Result<u64, StoreError> {
        Ok(zones::replace_zones(&*self.lock()?, zones)?)
    }

    fn current_zones(&self) -> Result<Vec<Zone>, StoreError> {
        Ok(zones::current_zones(&*self.lock()?)?)
    }
}

impl ForecastStore for DuckDbStore {
    fn append_forecasts(&self, batch: &[Forecast]) -> Result<(), StoreError> {
        Ok(forecasts::append_forecasts(&*self.lock()?, batch)?)
    }

    fn latest_forecasts(&self) -> Result<Vec<Forecast>, StoreError> {
        Ok(forecasts::latest_forecasts(&*self.lock()?)?)
    }
}
