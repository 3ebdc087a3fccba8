//! Windowed statistics and the bounded trend-change score.

use chrono::{DateTime, Duration, Utc};
use quakewatch_analytics_models::{TrendOutcome, TrendParams};
use quakewatch_event_models::{
    ActivityLabel, Event, EventQuery, MagnitudeHistogram, PressureLabel, StatSnapshot, TimeRange,
    TrendDirection,
};
use quakewatch_store::{EventStore, SnapshotStore};

use crate::AnalyticsError;

/// Trend scoring only runs on windows with more events than this.
pub const MIN_EVENTS_FOR_TREND: u64 = 50;

/// Bound on the raw percentage change.
pub const RAW_TREND_BOUND: f64 = 200.0;

/// Bound of the reported trend percentage.
pub const TREND_BOUND: f64 = 100.0;

/// Computes a [`StatSnapshot`] over a time window and appends it.
pub struct TrendAnalyzer<'a> {
    events: &'a dyn EventStore,
    snapshots: &'a dyn SnapshotStore,
}

impl<'a> TrendAnalyzer<'a> {
    /// Creates an analyzer reading from `events` and writing to
    /// `snapshots`.
    #[must_use]
    pub const fn new(events: &'a dyn EventStore, snapshots: &'a dyn SnapshotStore) -> Self {
        Self { events, snapshots }
    }

    /// Analyzes the window ending at `params.end` (or now).
    ///
    /// Writes exactly one snapshot when the window has events and nothing
    /// otherwise. Events are never modified.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::InvalidParameter`] for a zero-length
    /// window, or [`AnalyticsError::Store`] if a read or write fails.
    pub fn run(&self, params: &TrendParams) -> Result<TrendOutcome, AnalyticsError> {
        if params.window_hours == 0 {
            return Err(AnalyticsError::InvalidParameter {
                message: "window_hours must be at least 1".to_string(),
            });
        }

        let captured_at = Utc::now();
        let end = params.end.unwrap_or(captured_at);
        let window = TimeRange::new(end - Duration::hours(i64::from(params.window_hours)), end);

        self.run_window(window, captured_at)
    }

    /// Analyzes an explicit window.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Store`] if a read or write fails.
    pub fn run_window(
        &self,
        window: TimeRange,
        captured_at: DateTime<Utc>,
    ) -> Result<TrendOutcome, AnalyticsError> {
        let events = self.events.query_events(&EventQuery::in_range(window))?;

        let Some(snapshot) = compute_snapshot(&events, window, captured_at) else {
            log::info!("No events between {window}; no snapshot written");
            return Ok(TrendOutcome::NoData { window });
        };

        self.snapshots.append_snapshot(&snapshot)?;

        log::info!(
            "Snapshot recorded: {} events, trend {:+.1}% ({})",
            snapshot.event_count,
            snapshot.trend_percent,
            snapshot.activity_label
        );

        Ok(TrendOutcome::Recorded { snapshot })
    }
}

/// Builds the snapshot for `events` (already restricted to `window` and in
/// time order). Returns `None` for an empty window.
#[must_use]
pub fn compute_snapshot(
    events: &[Event],
    window: TimeRange,
    captured_at: DateTime<Utc>,
) -> Option<StatSnapshot> {
    if events.is_empty() {
        return None;
    }

    let event_count = events.len() as u64;
    let magnitudes: Vec<f64> = events.iter().filter_map(|e| e.magnitude).collect();
    let depths: Vec<f64> = events.iter().filter_map(|e| e.depth_km).collect();

    // First event in time order among those sharing the largest magnitude.
    let strongest_event_id = events
        .iter()
        .filter_map(|e| e.magnitude.map(|m| (m, e)))
        .fold(None::<(f64, &Event)>, |best, (m, e)| match best {
            Some((best_m, _)) if best_m >= m => best,
            _ => Some((m, e)),
        })
        .map(|(_, e)| e.id.clone());

    let trend_percent = if event_count > MIN_EVENTS_FOR_TREND {
        trend_percent(&magnitudes)
    } else {
        0.0
    };
    let (trend_direction, activity_label, pressure_label) = classify(trend_percent);

    Some(StatSnapshot {
        captured_at,
        window_start: window.start,
        window_end: window.end,
        event_count,
        avg_magnitude: mean(&magnitudes),
        max_magnitude: magnitudes.iter().copied().reduce(f64::max),
        min_magnitude: magnitudes.iter().copied().reduce(f64::min),
        avg_depth: mean(&depths),
        max_depth: depths.iter().copied().reduce(f64::max),
        strongest_event_id,
        magnitude_histogram: MagnitudeHistogram::from_magnitudes(magnitudes.iter().copied()),
        trend_direction,
        trend_percent,
        activity_label,
        pressure_label,
    })
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Relative change in mean magnitude between the first `⌊n/2⌋` values and
/// the rest, in percent.
///
/// The unclamped change is bounded to `[-200, 200]`; once it reaches that
/// bound it is replaced by `±100` for a magnitude jump above 1, otherwise by
/// `±|Δ| × 50`. The result always lies in `[-100, 100]`. A non-positive
/// first-half mean yields 0.
#[must_use]
pub fn trend_percent(magnitudes: &[f64]) -> f64 {
    let half = magnitudes.len() / 2;
    if half == 0 {
        return 0.0;
    }

    let (Some(m1), Some(m2)) = (mean(&magnitudes[..half]), mean(&magnitudes[half..])) else {
        return 0.0;
    };

    if m1 <= 0.0 {
        return 0.0;
    }

    let raw = (m2 - m1) / m1 * 100.0;
    if raw.abs() < RAW_TREND_BOUND {
        return raw.clamp(-TREND_BOUND, TREND_BOUND);
    }

    let delta = m2 - m1;
    if delta.abs() > 1.0 {
        TREND_BOUND.copysign(delta)
    } else {
        delta * 50.0
    }
}

/// Maps a trend percentage to its direction, activity and pressure labels.
#[must_use]
pub fn classify(trend_percent: f64) -> (TrendDirection, ActivityLabel, PressureLabel) {
    let direction = if trend_percent > 5.0 {
        TrendDirection::Increasing
    } else if trend_percent < -5.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    let (activity, pressure) = if trend_percent > 20.0 {
        (ActivityLabel::StrongIncrease, PressureLabel::High)
    } else if trend_percent > 5.0 {
        (ActivityLabel::MildIncrease, PressureLabel::Medium)
    } else if trend_percent < -20.0 {
        (ActivityLabel::StrongDecrease, PressureLabel::Low)
    } else if trend_percent < -5.0 {
        (ActivityLabel::MildDecrease, PressureLabel::Low)
    } else {
        (ActivityLabel::Stable, PressureLabel::Medium)
    };

    (direction, activity, pressure)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use quakewatch_store::memory::MemoryStore;

    use super::*;

    fn window() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 3, 0, 0, 0).unwrap(),
        )
    }

    fn events(magnitudes: &[f64]) -> Vec<Event> {
        let start = window().start;
        magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let mut event = Event::new(format!("ev{i:03}"));
                event.occurred_at = Some(start + Duration::minutes(i64::try_from(i).unwrap() * 30));
                event.magnitude = Some(m);
                event.depth_km = Some(10.0 + i as f64);
                event
            })
            .collect()
    }

    #[test]
    fn statistics_and_strongest_event() {
        let snapshot =
            compute_snapshot(&events(&[2.5, 6.1, 3.3, 6.1, 4.0]), window(), window().end).unwrap();

        assert_eq!(snapshot.event_count, 5);
        assert_eq!(snapshot.max_magnitude, Some(6.1));
        assert_eq!(snapshot.min_magnitude, Some(2.5));
        assert_eq!(snapshot.max_depth, Some(14.0));
        assert_eq!(snapshot.strongest_event_id.as_deref(), Some("ev001"));
        assert_eq!(snapshot.magnitude_histogram.counts(), [1, 1, 1, 0, 2]);
        assert!((snapshot.avg_magnitude.unwrap() - 4.4).abs() < 1e-9);
    }

    #[test]
    fn small_windows_are_stable() {
        let magnitudes: Vec<f64> = (0..50).map(|i| if i < 25 { 1.0 } else { 5.0 }).collect();
        let snapshot = compute_snapshot(&events(&magnitudes), window(), window().end).unwrap();

        assert!(snapshot.trend_percent.abs() < f64::EPSILON);
        assert_eq!(snapshot.trend_direction, TrendDirection::Stable);
        assert_eq!(snapshot.activity_label, ActivityLabel::Stable);
    }

    #[test]
    fn large_jump_is_capped_at_one_hundred() {
        let magnitudes: Vec<f64> = std::iter::repeat_n(2.0, 30)
            .chain(std::iter::repeat_n(6.0, 30))
            .collect();
        let snapshot = compute_snapshot(&events(&magnitudes), window(), window().end).unwrap();

        assert!((snapshot.trend_percent - 100.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.trend_direction, TrendDirection::Increasing);
        assert_eq!(snapshot.activity_label, ActivityLabel::StrongIncrease);
        assert_eq!(snapshot.pressure_label, PressureLabel::High);
    }

    #[test]
    fn small_jump_near_zero_mean_is_scaled() {
        // m1 = 0.2, m2 = 0.8: raw +300%, |delta| = 0.6 -> 30.
        let score = trend_percent(&[0.2, 0.2, 0.8, 0.8]);
        assert!((score - 30.0).abs() < 1e-9);
    }

    #[test]
    fn moderate_change_is_reported_as_is() {
        // m1 = 4, m2 = 3: -25%.
        let score = trend_percent(&[4.0, 4.0, 3.0, 3.0]);
        assert!((score + 25.0).abs() < 1e-9);
        assert_eq!(
            classify(score),
            (
                TrendDirection::Decreasing,
                ActivityLabel::StrongDecrease,
                PressureLabel::Low
            )
        );
    }

    #[test]
    fn change_between_one_and_two_hundred_is_capped() {
        // m1 = 1, m2 = 2.5: raw +150%.
        let score = trend_percent(&[1.0, 1.0, 2.5, 2.5]);
        assert!((score - 100.0).abs() < f64::EPSILON);
        let score = trend_percent(&[2.5, 2.5, 0.5, 0.5]);
        assert!((score + 80.0).abs() < 1e-9);
    }

    #[test]
    fn zero_first_half_yields_zero() {
        assert!(trend_percent(&[0.0, 0.0, 3.0, 3.0]).abs() < f64::EPSILON);
        assert!(trend_percent(&[4.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn label_thresholds() {
        assert_eq!(classify(20.0).1, ActivityLabel::MildIncrease);
        assert_eq!(classify(5.0).1, ActivityLabel::Stable);
        assert_eq!(classify(-5.0).1, ActivityLabel::Stable);
        assert_eq!(classify(-20.0).1, ActivityLabel::MildDecrease);
        assert_eq!(classify(-20.0).2, PressureLabel::Low);
        assert_eq!(classify(20.1).2, PressureLabel::High);
    }

    #[test]
    fn empty_window_writes_nothing() {
        let store = MemoryStore::new();
        let analyzer = TrendAnalyzer::new(&store, &store);

        let outcome = analyzer.run_window(window(), window().end).unwrap();
        assert_eq!(outcome, TrendOutcome::NoData { window: window() });
        assert!(store.snapshots().unwrap().is_empty());
    }

    #[test]
    fn run_appends_one_snapshot() {
        let store = MemoryStore::with_events(&events(&[3.0, 4.0, 5.0])).unwrap();
        let analyzer = TrendAnalyzer::new(&store, &store);

        let outcome = analyzer.run_window(window(), window().end).unwrap();
        assert!(matches!(outcome, TrendOutcome::Recorded { ref snapshot } if snapshot.event_count == 3));
        assert_eq!(store.snapshots().unwrap().len(), 1);
        assert_eq!(
            store.latest_snapshot().unwrap().unwrap().window_start,
            window().start
        );
    }

    #[test]
    fn zero_window_is_rejected() {
        let store = MemoryStore::new();
        let analyzer = TrendAnalyzer::new(&store, &store);
        let params = TrendParams {
            window_hours: 0,
            end: None,
        };
        assert!(matches!(
            analyzer.run(&params),
            Err(AnalyticsError::InvalidParameter { .. })
        ));
    }
}
