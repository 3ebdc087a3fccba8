#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parameter and result types for the three analytics jobs.
//!
//! Each job takes a `*Params` value (built from configuration and CLI
//! flags) and returns a structured outcome that the CLI prints as JSON.
//! Date ranges arrive as raw `YYYY-MM-DD` strings so that validation
//! happens in one place, inside the jobs, before any store access.

use chrono::{DateTime, Utc};
use quakewatch_event_models::{Forecast, StatSnapshot, TimeRange, Zone};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default trend window length.
pub const DEFAULT_WINDOW_HOURS: u32 = 24;

/// Default number of geographic clusters.
pub const DEFAULT_CLUSTERS: usize = 5;

/// Default number of most recent events used for training.
pub const DEFAULT_HISTORY_LIMIT: usize = 2000;

/// Default minimum number of usable training rows.
pub const DEFAULT_MIN_TRAINING_ROWS: usize = 50;

/// Seed shared by clustering and model training unless overridden.
pub const DEFAULT_SEED: u64 = 42;

/// Parameters for a trend analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendParams {
    /// Window length ending at `end`.
    pub window_hours: u32,
    /// Exclusive window end. `None` means "now".
    pub end: Option<DateTime<Utc>>,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_WINDOW_HOURS,
            end: None,
        }
    }
}

/// Result of a trend analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendOutcome {
    /// No events fell in the window; nothing was written.
    NoData {
        /// The analyzed window.
        window: TimeRange,
    },
    /// A snapshot was computed and appended.
    Recorded {
        /// The appended snapshot.
        snapshot: StatSnapshot,
    },
}

/// Parameters for a geographic clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterParams {
    /// Number of clusters (`K`).
    pub clusters: usize,
    /// Number of k-means restarts; the lowest-inertia run wins.
    pub restarts: usize,
    /// Maximum Lloyd iterations per restart.
    pub max_iterations: usize,
    /// Relative centroid-shift tolerance that ends a restart early.
    pub tolerance: f64,
    /// Seed for k-means++ initialization.
    pub seed: u64,
    /// Optional inclusive start date (`YYYY-MM-DD`).
    pub start_date: Option<String>,
    /// Optional inclusive end date (`YYYY-MM-DD`).
    pub end_date: Option<String>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: DEFAULT_SEED,
            start_date: None,
            end_date: None,
        }
    }
}

/// Result of a clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
    /// Number of clusters produced.
    pub clusters: usize,
    /// Number of events assigned to a zone.
    pub total_events: u64,
    /// Events skipped because they lacked coordinates.
    pub skipped_events: u64,
    /// Version of the zone set that was made current.
    pub zone_version: u64,
    /// `"all_data"` or `"<start> to <end>"`.
    pub time_range: String,
    /// The written zones, ordered by `zone_id`.
    pub zones: Vec<Zone>,
}

/// Regression algorithm used by the forecaster.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ModelFamily {
    /// Bootstrap ensemble of regression trees.
    #[default]
    RandomForest,
    /// Ordinary least squares.
    Linear,
    /// Epsilon support vector regression with an RBF kernel.
    #[serde(rename = "SVM")]
    #[strum(serialize = "SVM")]
    Svm,
}

/// Parameters for a forecasting run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastParams {
    /// Number of most recent events to train on when no range is given.
    pub history_limit: usize,
    /// Minimum usable rows after imputation.
    pub min_training_rows: usize,
    /// Number of days to forecast, starting tomorrow.
    pub horizon_days: u32,
    /// Regression algorithm.
    pub model: ModelFamily,
    /// Trees per random forest.
    pub trees: usize,
    /// Seed for model training and imputation jitter.
    pub seed: u64,
    /// Optional inclusive start date (`YYYY-MM-DD`).
    pub start_date: Option<String>,
    /// Optional inclusive end date (`YYYY-MM-DD`).
    pub end_date: Option<String>,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            min_training_rows: DEFAULT_MIN_TRAINING_ROWS,
            horizon_days: 1,
            model: ModelFamily::RandomForest,
            trees: 100,
            seed: DEFAULT_SEED,
            start_date: None,
            end_date: None,
        }
    }
}

/// Result of a forecasting run. Both variants carry the rows that were
/// appended to the forecast store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    /// Models were trained and forecasts written.
    Forecasted {
        /// Algorithm used.
        model: ModelFamily,
        /// Usable rows after imputation.
        training_rows: usize,
        /// Activity level broadcast to every row.
        activity_level: f64,
        /// Appended rows, three per horizon day.
        forecasts: Vec<Forecast>,
    },
    /// Training could not proceed; one error triple was written.
    Failed {
        /// Why training could not proceed.
        reason: String,
        /// The appended error rows.
        forecasts: Vec<Forecast>,
    },
}

impl ForecastOutcome {
    /// The rows appended by this run.
    #[must_use]
    pub fn forecasts(&self) -> &[Forecast] {
        match self {
            Self::Forecasted { forecasts, .. } | Self::Failed { forecasts, .. } => forecasts,
        }
    }
}

/// Row accounting for one imputation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImputeReport {
    /// Rows handed to the imputer.
    pub input_rows: usize,
    /// Rows dropped for lacking `occurred_at`.
    pub missing_time: usize,
    /// Rows dropped because no coordinate could be recovered.
    pub unrecoverable_coordinates: usize,
    /// Rows dropped because magnitude or depth stayed missing.
    pub unrecoverable_values: usize,
    /// Coordinates estimated through the gazetteer.
    pub gazetteer_estimates: usize,
    /// Rows returned.
    pub output_rows: usize,
}

impl ImputeReport {
    /// Total number of dropped rows.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.missing_time + self.unrecoverable_coordinates + self.unrecoverable_values
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn model_family_parses_case_insensitively() {
        assert_eq!(
            ModelFamily::from_str("randomforest").unwrap(),
            ModelFamily::RandomForest
        );
        assert_eq!(ModelFamily::from_str("LINEAR").unwrap(), ModelFamily::Linear);
        assert_eq!(ModelFamily::from_str("svm").unwrap(), ModelFamily::Svm);
        assert!(ModelFamily::from_str("xgboost").is_err());
        assert_eq!(ModelFamily::Svm.to_string(), "SVM");
    }

    #[test]
    fn outcomes_serialize_with_status_tag() {
        let outcome = ForecastOutcome::Failed {
            reason: "only 3 records".to_string(),
            forecasts: Vec::new(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "only 3 records");
    }

    #[test]
    fn defaults_match_documented_values() {
        let cluster = ClusterParams::default();
        assert_eq!(cluster.clusters, 5);
        assert_eq!(cluster.restarts, 10);
        assert_eq!(cluster.seed, 42);

        let forecast = ForecastParams::default();
        assert_eq!(forecast.history_limit, 2000);
        assert_eq!(forecast.min_training_rows, 50);
        assert_eq!(forecast.horizon_days, 1);
        assert_eq!(forecast.model, ModelFamily::RandomForest);

        assert_eq!(TrendParams::default().window_hours, 24);
    }
}
