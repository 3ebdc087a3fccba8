#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The quakewatch analytics jobs.
//!
//! Three independent batch jobs read from an [`EventStore`] and write to
//! their own result sink:
//!
//! - [`trend::TrendAnalyzer`] appends a [`StatSnapshot`] for a time window.
//! - [`cluster::GeoClusterer`] partitions events into named zones, labels
//!   every event with its zone and swaps in the new zone set.
//! - [`forecast::Forecaster`] imputes recent history, trains two cascaded
//!   regressors and appends magnitude, depth and risk forecasts.
//!
//! Every job receives its stores as explicit references, so the same code
//! runs against `DuckDB` in production and an in-memory store in tests.
//!
//! [`EventStore`]: quakewatch_store::EventStore
//! [`StatSnapshot`]: quakewatch_event_models::StatSnapshot

pub mod cluster;
pub mod dates;
pub mod forecast;
pub mod impute;
pub mod trend;

use quakewatch_geography::GeographyError;
use quakewatch_store::StoreError;
use thiserror::Error;

/// Errors that can occur while running an analytics job.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Too few events to run the job.
    #[error("Insufficient data: need at least {required} events, found {actual}")]
    InsufficientData {
        /// Minimum number of events needed.
        required: usize,
        /// Number of usable events found.
        actual: usize,
    },

    /// A job parameter is invalid. Raised before any store access.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of what went wrong.
        message: String,
    },

    /// Reading from or writing to a store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A geography lookup could not be set up.
    #[error(transparent)]
    Geography(#[from] GeographyError),
}
