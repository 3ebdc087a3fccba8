#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage seams for the analytics jobs.
//!
//! The jobs never talk to a database directly. They receive an
//! [`EventStore`] to read events from, plus one result store per product:
//! [`SnapshotStore`], [`ZoneStore`] (which also commits the zone labels a
//! clustering run writes onto events) and [`ForecastStore`]. The `DuckDB` implementation lives in
//! `quakewatch_database`; [`memory::MemoryStore`] backs tests and dry runs.
//!
//! Every multi-row write is all-or-nothing: an implementation must either
//! apply the whole batch or leave the store untouched.

pub mod memory;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quakewatch_event_models::{Event, EventQuery, Forecast, StatSnapshot, Zone};
use thiserror::Error;

/// Errors that can occur while reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed. The write (if any) was rolled back.
    #[error("Storage backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },

    /// A zone label was written for an event that does not exist.
    #[error("Unknown event id: {id}")]
    UnknownEvent {
        /// The missing event id.
        id: String,
    },

    /// A stored value could not be converted back into a model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Append/update store of seismic events keyed by their upstream id.
pub trait EventStore: Send + Sync {
    /// Returns the events matching `query` in ascending `occurred_at` order
    /// (events without a time last, ties broken by id).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    /// Inserts or merges events by id. A republished event overwrites the
    /// stored fields but keeps its existing `zone_id` when the incoming one
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails; nothing is written.
    fn upsert_events(&self, events: &[Event]) -> Result<u64, StoreError>;

    /// Attaches a zone label to a single event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownEvent`] if the id is not stored.
    fn update_zone(&self, id: &str, zone_id: i32) -> Result<(), StoreError>;

    /// Attaches zone labels to many events in one atomic operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any single label cannot be written; in that
    /// case no label is changed.
    fn bulk_update_zones(&self, labels: &BTreeMap<String, i32>) -> Result<u64, StoreError>;

    /// Deletes events, optionally only those that occurred before `before`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn purge_events(&self, before: Option<DateTime<Utc>>) -> Result<u64, StoreError>;
}

/// Append-only sink for trend analysis snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Appends one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn append_snapshot(&self, snapshot: &StatSnapshot) -> Result<(), StoreError>;

    /// Returns the snapshot with the greatest `captured_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn latest_snapshot(&self) -> Result<Option<StatSnapshot>, StoreError>;
}

/// Outcome of committing a clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteringCommit {
    /// Events whose zone label was written.
    pub labelled: u64,
    /// Version of the zone set that is now current.
    pub version: u64,
}

/// Versioned store for the zone set.
///
/// Zone labels live on the events, so an implementation backs both the
/// zone table and the event table it labels.
pub trait ZoneStore: Send + Sync {
    /// Writes the zone labels onto events and swaps in `zones` as the new
    /// current set, in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any label or zone write fails. Nothing is
    /// committed: events keep their previous labels and the previous zone
    /// set stays current.
    fn apply_clustering(
        &self,
        labels: &BTreeMap<String, i32>,
        zones: &[Zone],
    ) -> Result<ClusteringCommit, StoreError>;

    /// Writes `zones` as a new version and makes it current in one atomic
    /// step. Readers never observe an empty or mixed zone set.
    ///
    /// Returns the new version number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the swap fails; the previous set stays
    /// current.
    fn replace_zones(&self, zones: &[Zone]) -> Result<u64, StoreError>;

    /// Returns the current zone set ordered by `zone_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn current_zones(&self) -> Result<Vec<Zone>, StoreError>;
}

/// Append-only sink for forecasts.
pub trait ForecastStore: Send + Sync {
    /// Appends a batch of forecasts atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails; nothing is written.
    fn append_forecasts(&self, forecasts: &[Forecast]) -> Result<(), StoreError>;

    /// Returns the most recent forecast (by `created_at`) for each metric,
    /// ordered by metric.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn latest_forecasts(&self) -> Result<Vec<Forecast>, StoreError>;
}

/// Everything the three analytics jobs need from one backend.
pub trait AnalyticsStore: EventStore + SnapshotStore + ZoneStore + ForecastStore {}

impl<T: EventStore + SnapshotStore + ZoneStore + ForecastStore> AnalyticsStore for T {}
