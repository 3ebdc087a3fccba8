#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Seismic event, statistics snapshot, zone and forecast types.
//!
//! This crate defines the records shared by every stage of the quakewatch
//! pipeline: the raw [`Event`] written by the ingester, the
//! [`StatSnapshot`] produced by trend analysis, the [`Zone`] set produced by
//! geographic clustering and the [`Forecast`] rows produced by the
//! forecaster.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Zone label given to events whose cluster could not be inferred.
pub const UNASSIGNED_ZONE: i32 = -1;

/// Prefix of the `model_name` carried by forecasts that signal a failed run.
pub const ERROR_MODEL_PREFIX: &str = "ERROR_NO_DATA";

/// One reported seismic occurrence.
///
/// Keyed by the upstream `id`. Everything else may be missing in the source
/// feed; the analytics fill or drop gaps before doing any numeric work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Stable upstream identifier (e.g. `"us7000k1ab"`).
    pub id: String,
    /// Free-text location description (e.g. `"45 km SW of Tokyo, Japan"`).
    pub place: Option<String>,
    /// Reported magnitude.
    pub magnitude: Option<f64>,
    /// Hypocenter depth in kilometres.
    pub depth_km: Option<f64>,
    /// WGS84 latitude.
    pub latitude: Option<f64>,
    /// WGS84 longitude.
    pub longitude: Option<f64>,
    /// When the event occurred.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Cluster index assigned by the last clustering run.
    pub zone_id: Option<i32>,
    /// Magnitude scale reported upstream (e.g. `"ml"`, `"mb"`).
    pub mag_type: Option<String>,
    /// Review status reported upstream (e.g. `"reviewed"`).
    pub status: Option<String>,
    /// Whether the source flagged a tsunami.
    pub tsunami: Option<bool>,
    /// Upstream detail page.
    pub url: Option<String>,
    /// When the upstream source last republished this event.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Creates an event with only its identifier set.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            place: None,
            magnitude: None,
            depth_km: None,
            latitude: None,
            longitude: None,
            occurred_at: None,
            zone_id: None,
            mag_type: None,
            status: None,
            tsunami: None,
            url: None,
            updated_at: None,
        }
    }

    /// Returns `true` when both coordinates are present.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a new window.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Which events an [`Event`] query should return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Only events whose `occurred_at` falls in this window.
    pub range: Option<TimeRange>,
    /// Only the `n` most recent events by `occurred_at`.
    pub latest: Option<usize>,
}

impl EventQuery {
    /// Every stored event.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            range: None,
            latest: None,
        }
    }

    /// Events occurring inside `range`.
    #[must_use]
    pub const fn in_range(range: TimeRange) -> Self {
        Self {
            range: Some(range),
            latest: None,
        }
    }

    /// The `n` most recent events.
    #[must_use]
    pub const fn latest(n: usize) -> Self {
        Self {
            range: None,
            latest: Some(n),
        }
    }
}

/// Direction of the magnitude trend between two halves of a window.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrendDirection {
    /// Mean magnitude rose by more than 5 %.
    Increasing,
    /// Mean magnitude fell by more than 5 %.
    Decreasing,
    /// Change within ±5 %, or not enough events to judge.
    Stable,
}

/// Human-readable description of how seismic activity is changing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLabel {
    /// Trend above +20 %.
    #[strum(serialize = "Strong increase")]
    StrongIncrease,
    /// Trend in (+5 %, +20 %].
    #[strum(serialize = "Mild increase")]
    MildIncrease,
    /// Trend in [−5 %, +5 %].
    #[strum(serialize = "Stable")]
    Stable,
    /// Trend in [−20 %, −5 %).
    #[strum(serialize = "Mild decrease")]
    MildDecrease,
    /// Trend below −20 %.
    #[strum(serialize = "Strong decrease")]
    StrongDecrease,
}

/// Coarse "seismic pressure" reading derived from the trend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PressureLabel {
    /// Strong increase.
    High,
    /// Mild increase or stable.
    Medium,
    /// Any decrease.
    Low,
}

/// Magnitude histogram with fixed bucket edges
/// `<3.0, [3.0,4.0), [4.0,5.0), [5.0,6.0), ≥6.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagnitudeHistogram {
    /// Events below magnitude 3.0.
    pub below_3: u64,
    /// Events in `[3.0, 4.0)`.
    pub from_3_to_4: u64,
    /// Events in `[4.0, 5.0)`.
    pub from_4_to_5: u64,
    /// Events in `[5.0, 6.0)`.
    pub from_5_to_6: u64,
    /// Events at magnitude 6.0 or above.
    pub at_least_6: u64,
}

impl MagnitudeHistogram {
    /// Number of buckets.
    pub const BUCKETS: usize = 5;

    /// Builds a histogram from a sequence of magnitudes.
    #[must_use]
    pub fn from_magnitudes(magnitudes: impl IntoIterator<Item = f64>) -> Self {
        let mut histogram = Self::default();
        for magnitude in magnitudes {
            histogram.record(magnitude);
        }
        histogram
    }

    /// Counts one magnitude into its bucket.
    pub fn record(&mut self, magnitude: f64) {
        match Self::bucket_index(magnitude) {
            0 => self.below_3 += 1,
            1 => self.from_3_to_4 += 1,
            2 => self.from_4_to_5 += 1,
            3 => self.from_5_to_6 += 1,
            _ => self.at_least_6 += 1,
        }
    }

    /// Returns the bucket a magnitude falls into (0-4).
    #[must_use]
    pub fn bucket_index(magnitude: f64) -> usize {
        if magnitude < 3.0 {
            0
        } else if magnitude < 4.0 {
            1
        } else if magnitude < 5.0 {
            2
        } else if magnitude < 6.0 {
            3
        } else {
            4
        }
    }

    /// Bucket counts in edge order.
    #[must_use]
    pub const fn counts(&self) -> [u64; Self::BUCKETS] {
        [
            self.below_3,
            self.from_3_to_4,
            self.from_4_to_5,
            self.from_5_to_6,
            self.at_least_6,
        ]
    }

    /// Rebuilds a histogram from bucket counts in edge order.
    #[must_use]
    pub const fn from_counts(counts: [u64; Self::BUCKETS]) -> Self {
        Self {
            below_3: counts[0],
            from_3_to_4: counts[1],
            from_4_to_5: counts[2],
            from_5_to_6: counts[3],
            at_least_6: counts[4],
        }
    }

    /// Total number of magnitudes counted.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.below_3 + self.from_3_to_4 + self.from_4_to_5 + self.from_5_to_6 + self.at_least_6
    }
}

/// Point-in-time rollup of statistics over a window of events.
///
/// Append-only; the forecaster only ever reads the most recent one by
/// `captured_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSnapshot {
    /// When the analysis ran.
    pub captured_at: DateTime<Utc>,
    /// Inclusive window start.
    pub window_start: DateTime<Utc>,
    /// Exclusive window end.
    pub window_end: DateTime<Utc>,
    /// Number of events in the window.
    pub event_count: u64,
    /// Mean magnitude over events with a magnitude.
    pub avg_magnitude: Option<f64>,
    /// Largest magnitude.
    pub max_magnitude: Option<f64>,
    /// Smallest magnitude.
    pub min_magnitude: Option<f64>,
    /// Mean depth in kilometres.
    pub avg_depth: Option<f64>,
    /// Deepest event in kilometres.
    pub max_depth: Option<f64>,
    /// Id of the largest-magnitude event (first in time order on ties).
    pub strongest_event_id: Option<String>,
    /// Magnitude distribution.
    pub magnitude_histogram: MagnitudeHistogram,
    /// Direction of the mean-magnitude trend.
    pub trend_direction: TrendDirection,
    /// Bounded relative change in mean magnitude, in percent.
    pub trend_percent: f64,
    /// Human-readable activity description.
    pub activity_label: ActivityLabel,
    /// Seismic pressure reading.
    pub pressure_label: PressureLabel,
}

/// Heuristic risk level assigned to a geographic zone.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum RiskLevel {
    /// Never produced by the member-count heuristic, kept for completeness.
    Low,
    /// At or below the mean per-zone member count.
    Medium,
    /// Strictly above the mean per-zone member count.
    High,
}

/// A geographic cluster of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Cluster index in `[0, K)`. Not stable across runs.
    pub zone_id: i32,
    /// Resolved region name.
    pub name: String,
    /// Centroid latitude.
    pub centroid_lat: f64,
    /// Centroid longitude.
    pub centroid_lon: f64,
    /// Heuristic risk level.
    pub risk_level: RiskLevel,
    /// Number of events assigned to this zone.
    pub event_count: u64,
    /// When the zone set was written.
    pub updated_at: DateTime<Utc>,
}

/// Whether a forecast carries a number or a label.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ForecastKind {
    /// Real-valued prediction.
    Regression,
    /// Categorical prediction.
    Classification,
}

/// The quantity a forecast predicts.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ForecastMetric {
    /// Magnitude.
    Magnitude,
    /// Depth in kilometres.
    Depth,
    /// Categorical risk.
    Risk,
}

/// Risk category derived from a predicted magnitude.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum RiskCategory {
    /// Below magnitude 4.5.
    Low,
    /// `[4.5, 6.0)`.
    Moderate,
    /// `[6.0, 7.0)`.
    High,
    /// 7.0 and above.
    Critical,
}

/// A persisted point prediction for a future date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Regression or classification.
    pub kind: ForecastKind,
    /// What is being predicted.
    pub metric: Option<ForecastMetric>,
    /// Predicted value for regressions.
    pub value: Option<f64>,
    /// Predicted label for classifications.
    pub label: Option<String>,
    /// Heuristic confidence in `[0, 1]`.
    pub confidence: f64,
    /// Day the prediction is for.
    pub target_date: NaiveDate,
    /// Method identifier, or an `ERROR_NO_DATA: ...` message.
    pub model_name: String,
    /// When the forecast was written.
    pub created_at: DateTime<Utc>,
}

impl Forecast {
    /// Returns `true` if this row signals a failed forecasting run.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.model_name.starts_with(ERROR_MODEL_PREFIX)
    }
}
