//! Gap filling for event batches ahead of any numeric work.
//!
//! Rows without `occurred_at` are dropped, the rest are sorted by time and
//! filled field by field:
//!
//! 1. magnitude and depth take the mean of the nearest present neighbours
//!    on each side, a single neighbour's value, or the column median;
//! 2. latitude and longitude use the same neighbour rule, then the place
//!    gazetteer, and the row is dropped when both fail;
//! 3. `zone_id` takes the majority label of the surrounding 11 rows, or
//!    [`UNASSIGNED_ZONE`];
//! 4. a linear interpolation pass with edge back/forward fill mops up any
//!    residual numeric gap, and rows still incomplete are dropped.
//!
//! Filling is sequential: a value filled at one position is visible to the
//! neighbour scans of later positions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quakewatch_analytics_models::ImputeReport;
use quakewatch_event_models::{Event, UNASSIGNED_ZONE};
use quakewatch_geography::gazetteer::Gazetteer;
use rand::SeedableRng as _;
use rand::rngs::StdRng;

use crate::AnalyticsError;

/// Rows on each side of a gap that vote on its zone label.
pub const ZONE_VOTE_RADIUS: usize = 5;

/// A fully populated event row ready for feature engineering.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputedEvent {
    /// Upstream id.
    pub id: String,
    /// Occurrence time.
    pub occurred_at: DateTime<Utc>,
    /// Magnitude, observed or filled.
    pub magnitude: f64,
    /// Depth in kilometres, observed or filled.
    pub depth_km: f64,
    /// Latitude, observed or filled.
    pub latitude: f64,
    /// Longitude, observed or filled.
    pub longitude: f64,
    /// Zone label, observed, voted or [`UNASSIGNED_ZONE`].
    pub zone_id: i32,
}

#[derive(Debug, Clone)]
struct Row {
    id: String,
    occurred_at: DateTime<Utc>,
    place: Option<String>,
    magnitude: Option<f64>,
    depth_km: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    zone_id: Option<i32>,
}

/// Fills gaps in event batches.
pub struct Imputer {
    gazetteer: Gazetteer,
    rng: StdRng,
}

impl Imputer {
    /// Creates an imputer whose gazetteer jitter is seeded from the OS.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if the gazetteer cannot be built.
    pub fn new() -> Result<Self, AnalyticsError> {
        Ok(Self::with_gazetteer(Gazetteer::new()?, StdRng::from_os_rng()))
    }

    /// Creates an imputer with deterministic gazetteer jitter.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if the gazetteer cannot be built.
    pub fn seeded(seed: u64) -> Result<Self, AnalyticsError> {
        Ok(Self::with_gazetteer(
            Gazetteer::new()?,
            StdRng::seed_from_u64(seed),
        ))
    }

    /// Creates an imputer from explicit parts.
    #[must_use]
    pub const fn with_gazetteer(gazetteer: Gazetteer, rng: StdRng) -> Self {
        Self { gazetteer, rng }
    }

    /// Imputes `events`, returning the usable rows in time order and the
    /// row accounting.
    ///
    /// An empty result is a valid outcome: callers treat it as empty input.
    pub fn impute(&mut self, events: &[Event]) -> (Vec<ImputedEvent>, ImputeReport) {
        let mut report = ImputeReport {
            input_rows: events.len(),
            ..ImputeReport::default()
        };

        let mut rows: Vec<Row> = events
            .iter()
            .filter_map(|event| {
                event.occurred_at.map(|occurred_at| Row {
                    id: event.id.clone(),
                    occurred_at,
                    place: event.place.clone(),
                    magnitude: event.magnitude,
                    depth_km: event.depth_km,
                    latitude: event.latitude,
                    longitude: event.longitude,
                    zone_id: event.zone_id,
                })
            })
            .collect();

        report.missing_time = events.len() - rows.len();
        if report.missing_time > 0 {
            log::warn!("Dropped {} events without a timestamp", report.missing_time);
        }

        rows.sort_by_key(|row| row.occurred_at);

        fill_from_neighbours(&mut rows, |row| &mut row.magnitude);
        fill_from_neighbours(&mut rows, |row| &mut row.depth_km);

        let mut rows = self.fill_coordinates(rows, &mut report);

        vote_zones(&mut rows);

        interpolate(&mut rows, |row| &mut row.magnitude);
        interpolate(&mut rows, |row| &mut row.depth_km);
        interpolate(&mut rows, |row| &mut row.latitude);
        interpolate(&mut rows, |row| &mut row.longitude);

        let before = rows.len();
        let imputed: Vec<ImputedEvent> = rows
            .into_iter()
            .filter_map(|row| {
                Some(ImputedEvent {
                    magnitude: row.magnitude?,
                    depth_km: row.depth_km?,
                    latitude: row.latitude?,
                    longitude: row.longitude?,
                    zone_id: row.zone_id.unwrap_or(UNASSIGNED_ZONE),
                    id: row.id,
                    occurred_at: row.occurred_at,
                })
            })
            .collect();

        report.unrecoverable_values = before - imputed.len();
        if report.unrecoverable_values > 0 {
            log::warn!(
                "Dropped {} events with unrecoverable magnitude or depth",
                report.unrecoverable_values
            );
        }

        report.output_rows = imputed.len();
        log::debug!(
            "Imputed {} -> {} rows ({} gazetteer estimates)",
            report.input_rows,
            report.output_rows,
            report.gazetteer_estimates
        );

        (imputed, report)
    }

    /// Fills missing coordinates in place and drops rows that stay
    /// unlocated. Dropped rows are removed before later rows scan for
    /// neighbours.
    fn fill_coordinates(&mut self, rows: Vec<Row>, report: &mut ImputeReport) -> Vec<Row> {
        let mut kept: Vec<Row> = Vec::with_capacity(rows.len());
        let mut pending: std::collections::VecDeque<Row> = rows.into();

        while let Some(mut row) = pending.pop_front() {
            let mut located = true;

            for axis in [Axis::Latitude, Axis::Longitude] {
                if axis.get(&row).is_some() {
                    continue;
                }

                let before = kept.iter().rev().find_map(|r| axis.get(r));
                let after = pending.iter().find_map(|r| axis.get(r));

                match neighbour_value(before, after) {
                    Some(value) => axis.set(&mut row, value),
                    None => {
                        let estimate = row
                            .place
                            .as_deref()
                            .and_then(|place| self.gazetteer.estimate(place, &mut self.rng));
                        if let Some((lat, lon)) = estimate {
                            row.latitude = Some(lat);
                            row.longitude = Some(lon);
                            report.gazetteer_estimates += 1;
                        } else {
                            located = false;
                            break;
                        }
                    }
                }
            }

            if located {
                kept.push(row);
            } else {
                log::debug!("Dropping event {}: no recoverable coordinates", row.id);
                report.unrecoverable_coordinates += 1;
            }
        }

        if report.unrecoverable_coordinates > 0 {
            log::warn!(
                "Dropped {} events without recoverable coordinates",
                report.unrecoverable_coordinates
            );
        }

        kept
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    const fn get(self, row: &Row) -> Option<f64> {
        match self {
            Self::Latitude => row.latitude,
            Self::Longitude => row.longitude,
        }
    }

    const fn set(self, row: &mut Row, value: f64) {
        match self {
            Self::Latitude => row.latitude = Some(value),
            Self::Longitude => row.longitude = Some(value),
        }
    }
}

/// Mean of both neighbours, else whichever one exists.
fn neighbour_value(before: Option<f64>, after: Option<f64>) -> Option<f64> {
    match (before, after) {
        (Some(a), Some(b)) => Some(f64::midpoint(a, b)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Median of the present values, `None` when there are none.
fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    })
}

/// Nearest-neighbour fill with median fallback for one numeric column.
fn fill_from_neighbours(rows: &mut [Row], field: impl Fn(&mut Row) -> &mut Option<f64>) {
    let present: Vec<f64> = rows.iter_mut().filter_map(|row| *field(row)).collect();
    let fallback = median(&present);

    for i in 0..rows.len() {
        if field(&mut rows[i]).is_some() {
            continue;
        }

        let before = rows[..i].iter_mut().rev().find_map(|row| *field(row));
        let after = rows[i + 1..].iter_mut().find_map(|row| *field(row));

        *field(&mut rows[i]) = neighbour_value(before, after).or(fallback);
    }
}

/// Majority vote over the `ZONE_VOTE_RADIUS` rows on each side; ties go to
/// the smallest label and an empty window yields [`UNASSIGNED_ZONE`].
fn vote_zones(rows: &mut [Row]) {
    for i in 0..rows.len() {
        if rows[i].zone_id.is_some() {
            continue;
        }

        let start = i.saturating_sub(ZONE_VOTE_RADIUS);
        let end = (i + ZONE_VOTE_RADIUS + 1).min(rows.len());

        let mut votes: BTreeMap<i32, usize> = BTreeMap::new();
        for row in &rows[start..end] {
            if let Some(zone_id) = row.zone_id {
                *votes.entry(zone_id).or_default() += 1;
            }
        }

        // BTreeMap iterates ascending, and max_by_key keeps the last
        // maximum, so reverse to keep the smallest label on ties.
        let winner = votes
            .into_iter()
            .rev()
            .max_by_key(|(_, count)| *count)
            .map_or(UNASSIGNED_ZONE, |(zone_id, _)| zone_id);

        rows[i].zone_id = Some(winner);
    }
}

/// Linear interpolation by position over interior gaps, then back-fill of
/// leading gaps and forward-fill of trailing gaps. Present values are never
/// changed.
fn interpolate(rows: &mut [Row], field: impl Fn(&mut Row) -> &mut Option<f64>) {
    let known: Vec<(usize, f64)> = rows
        .iter_mut()
        .enumerate()
        .filter_map(|(i, row)| field(row).map(|v| (i, v)))
        .collect();

    let (Some(&(first_idx, first)), Some(&(last_idx, last))) = (known.first(), known.last())
    else {
        return;
    };

    for pair in known.windows(2) {
        let (i0, v0) = pair[0];
        let (i1, v1) = pair[1];
        #[allow(clippy::cast_precision_loss)]
        for (i, row) in rows.iter_mut().enumerate().take(i1).skip(i0 + 1) {
            let t = (i - i0) as f64 / (i1 - i0) as f64;
            *field(row) = Some((v1 - v0).mul_add(t, v0));
        }
    }

    for row in &mut rows[..first_idx] {
        *field(row) = Some(first);
    }
    for row in &mut rows[last_idx + 1..] {
        *field(row) = Some(last);
    }
}
