//! Magnitude, depth and risk forecasts from recent history.
//!
//! A run pulls recent events, imputes their gaps, trains a
//! [`CascadedPredictor`] and appends one magnitude, one depth and one risk
//! row per horizon day. When there is too little usable data (or a model
//! cannot be fitted) a single ERROR triple is appended instead, so readers
//! always find a recent row for every metric.

pub mod cascade;
pub mod model;

use chrono::{DateTime, Days, NaiveDate, Utc};
use quakewatch_analytics_models::{ForecastOutcome, ForecastParams, ModelFamily};
use quakewatch_event_models::{
    ERROR_MODEL_PREFIX, EventQuery, Forecast, ForecastKind, ForecastMetric, RiskCategory,
};
use quakewatch_store::{EventStore, ForecastStore, SnapshotStore};

use crate::AnalyticsError;
use crate::dates::resolve_range;
use crate::impute::Imputer;
use cascade::{CascadedPrediction, CascadedPredictor, InferenceRow};
use model::svr::MAX_TRAINING_ROWS as SVM_MAX_ROWS;

/// Label written on the risk row of an ERROR triple.
pub const ERROR_RISK_LABEL: &str = "ERROR - No Data Available";

/// Upper bound of the magnitude confidence.
const MAX_MAGNITUDE_CONFIDENCE: f64 = 0.95;

/// Lower bound of the depth confidence.
const MIN_DEPTH_CONFIDENCE: f64 = 0.6;

/// Maps a predicted magnitude to its risk category and fixed confidence.
#[must_use]
pub fn risk_category(magnitude: f64) -> (RiskCategory, f64) {
    if magnitude >= 7.0 {
        (RiskCategory::Critical, 0.95)
    } else if magnitude >= 6.0 {
        (RiskCategory::High, 0.90)
    } else if magnitude >= 4.5 {
        (RiskCategory::Moderate, 0.85)
    } else if magnitude >= 3.0 {
        (RiskCategory::Low, 0.80)
    } else {
        (RiskCategory::Low, 0.75)
    }
}

/// Heuristic `(magnitude, depth)` confidences for a training set size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn confidences(training_rows: usize) -> (f64, f64) {
    let magnitude = (0.7 + training_rows as f64 / 5000.0).min(MAX_MAGNITUDE_CONFIDENCE);
    let depth = (magnitude - 0.15).max(MIN_DEPTH_CONFIDENCE);
    (magnitude, depth)
}

/// Trains on recent events and appends forecasts.
pub struct Forecaster<'a> {
    events: &'a dyn EventStore,
    snapshots: &'a dyn SnapshotStore,
    forecasts: &'a dyn ForecastStore,
}

impl<'a> Forecaster<'a> {
    #[must_use]
    pub const fn new(
        events: &'a dyn EventStore,
        snapshots: &'a dyn SnapshotStore,
        forecasts: &'a dyn ForecastStore,
    ) -> Self {
        Self {
            events,
            snapshots,
            forecasts,
        }
    }

    /// Runs one forecast with targets counted from today.
    ///
    /// # Errors
    ///
    /// See [`Forecaster::run_at`].
    pub fn run(&self, params: &ForecastParams) -> Result<ForecastOutcome, AnalyticsError> {
        self.run_at(params, Utc::now())
    }

    /// Runs one forecast as if the current time were `now`.
    ///
    /// Too little data is not an error: it yields
    /// [`ForecastOutcome::Failed`] after the ERROR triple is written.
    ///
    /// # Errors
    ///
    /// * [`AnalyticsError::InvalidParameter`] for a zero horizon, history
    ///   limit or tree count, a bad date range, or an SVM training set
    ///   above its row limit; nothing is written
    /// * [`AnalyticsError::Store`] if a read or the append fails
    pub fn run_at(
        &self,
        params: &ForecastParams,
        now: DateTime<Utc>,
    ) -> Result<ForecastOutcome, AnalyticsError> {
        validate(params)?;
        let range = resolve_range(params.start_date.as_deref(), params.end_date.as_deref())?;
        let today = now.date_naive();
        let targets = target_dates(today, params.horizon_days)?;

        let query = range.map_or_else(
            || EventQuery::latest(params.history_limit),
            EventQuery::in_range,
        );
        let events = self.events.query_events(&query)?;

        let mut imputer = Imputer::seeded(params.seed)?;
        let (rows, report) = imputer.impute(&events);
        if report.dropped() > 0 {
            log::warn!(
                "Dropped {} of {} events during imputation ({} without time, {} without coordinates, {} without values)",
                report.dropped(),
                report.input_rows,
                report.missing_time,
                report.unrecoverable_coordinates,
                report.unrecoverable_values
            );
        }

        check_svm_rows(params.model, rows.len(), "range")?;

        #[allow(clippy::cast_precision_loss)]
        let activity_level = self
            .snapshots
            .latest_snapshot()?
            .map_or(rows.len() as f64, |snapshot| snapshot.event_count as f64);

        if rows.len() < params.min_training_rows {
            let reason = format!(
                "Insufficient data: only {} usable records after imputation, need at least {}",
                rows.len(),
                params.min_training_rows
            );
            return self.fail(reason, targets[0], now);
        }

        let mut predictor = CascadedPredictor::new(
            model::build(params.model, params.trees, params.seed),
            model::build(params.model, params.trees, params.seed),
        );
        if let Err(e) = predictor.fit(&rows, activity_level) {
            return self.fail(format!("Model training failed: {e}"), targets[0], now);
        }

        let Some(inference) = InferenceRow::summarize(&rows, activity_level) else {
            return self.fail("No rows to summarize".to_string(), targets[0], now);
        };
        let prediction = match predictor.predict(&inference) {
            Ok(prediction) => prediction,
            Err(e) => return self.fail(format!("Prediction failed: {e}"), targets[0], now),
        };

        let forecasts: Vec<Forecast> = targets
            .iter()
            .flat_map(|&target| success_triple(params.model, &prediction, rows.len(), target, now))
            .collect();
        self.forecasts.append_forecasts(&forecasts)?;

        log::info!(
            "Forecast magnitude {:.2}, depth {:.1} km ({}) from {} rows with {} over {} day(s)",
            prediction.magnitude,
            prediction.depth_km,
            risk_category(prediction.magnitude).0,
            rows.len(),
            params.model,
            targets.len()
        );

        Ok(ForecastOutcome::Forecasted {
            model: params.model,
            training_rows: rows.len(),
            activity_level,
            forecasts,
        })
    }

    fn fail(
        &self,
        reason: String,
        target: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ForecastOutcome, AnalyticsError> {
        log::warn!("Forecast not possible: {reason}");

        let forecasts = error_triple(&reason, target, now);
        self.forecasts.append_forecasts(&forecasts)?;

        Ok(ForecastOutcome::Failed { reason, forecasts })
    }
}

fn validate(params: &ForecastParams) -> Result<(), AnalyticsError> {
    if params.start_date.is_none() {
        check_svm_rows(params.model, params.history_limit, "history_limit")?;
    }

    let message = if params.horizon_days == 0 {
        "horizon_days must be at least 1"
    } else if params.history_limit == 0 {
        "history_limit must be at least 1"
    } else if params.model == ModelFamily::RandomForest && params.trees == 0 {
        "trees must be at least 1"
    } else {
        return Ok(());
    };

    Err(AnalyticsError::InvalidParameter {
        message: message.to_string(),
    })
}

/// The SVM keeps an `n × n` kernel matrix, so its training set is capped.
fn check_svm_rows(model: ModelFamily, rows: usize, what: &str) -> Result<(), AnalyticsError> {
    if model == ModelFamily::Svm && rows > SVM_MAX_ROWS {
        return Err(AnalyticsError::InvalidParameter {
            message: format!(
                "{what} of {rows} exceeds the SVM limit of {SVM_MAX_ROWS} training rows"
            ),
        });
    }
    Ok(())
}

fn target_dates(today: NaiveDate, horizon_days: u32) -> Result<Vec<NaiveDate>, AnalyticsError> {
    (1..=horizon_days)
        .map(|day| {
            today
                .checked_add_days(Days::new(u64::from(day)))
                .ok_or_else(|| AnalyticsError::InvalidParameter {
                    message: format!("{today} + {day} days is out of range"),
                })
        })
        .collect()
}

fn success_triple(
    family: ModelFamily,
    prediction: &CascadedPrediction,
    training_rows: usize,
    target_date: NaiveDate,
    created_at: DateTime<Utc>,
) -> [Forecast; 3] {
    let (magnitude_confidence, depth_confidence) = confidences(training_rows);
    let (category, risk_confidence) = risk_category(prediction.magnitude);

    [
        Forecast {
            kind: ForecastKind::Regression,
            metric: Some(ForecastMetric::Magnitude),
            value: Some(prediction.magnitude),
            label: None,
            confidence: magnitude_confidence,
            target_date,
            model_name: format!("{family}_Magnitude"),
            created_at,
        },
        Forecast {
            kind: ForecastKind::Regression,
            metric: Some(ForecastMetric::Depth),
            value: Some(prediction.depth_km),
            label: None,
            confidence: depth_confidence,
            target_date,
            model_name: format!("{family}_Depth"),
            created_at,
        },
        Forecast {
            kind: ForecastKind::Classification,
            metric: Some(ForecastMetric::Risk),
            value: None,
            label: Some(category.to_string()),
            confidence: risk_confidence,
            target_date,
            model_name: format!("Enhanced_{family}_Risk"),
            created_at,
        },
    ]
}

fn error_triple(reason: &str, target_date: NaiveDate, created_at: DateTime<Utc>) -> Vec<Forecast> {
    let model_name = format!("{ERROR_MODEL_PREFIX}: {reason}");
    let row = |kind, metric, label: Option<&str>| Forecast {
        kind,
        metric: Some(metric),
        value: None,
        label: label.map(str::to_string),
        confidence: 0.0,
        target_date,
        model_name: model_name.clone(),
        created_at,
    };

    vec![
        row(ForecastKind::Regression, ForecastMetric::Magnitude, None),
        row(ForecastKind::Regression, ForecastMetric::Depth, None),
        row(
            ForecastKind::Classification,
            ForecastMetric::Risk,
            Some(ERROR_RISK_LABEL),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone as _};
    use quakewatch_event_models::Event;
    use quakewatch_store::memory::MemoryStore;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn history(count: u32) -> Vec<Event> {
        (0..count)
            .map(|i| {
                let mut event = Event::new(format!("ev{i:04}"));
                event.occurred_at = Some(now() - Duration::minutes(i64::from(count - i)));
                event.magnitude = Some(f64::from(i % 5).mul_add(0.5, 3.0));
                event.depth_km = Some(f64::from(i % 7).mul_add(5.0, 10.0));
                event.latitude = Some(f64::from(i % 3).mul_add(10.0, 20.0));
                event.longitude = Some(f64::from(i % 4).mul_add(-10.0, 140.0));
                event.zone_id = Some(i32::try_from(i % 3).unwrap());
                event
            })
            .collect()
    }

    #[test]
    fn risk_tiers() {
        assert_eq!(risk_category(7.0), (RiskCategory::Critical, 0.95));
        assert_eq!(risk_category(6.2), (RiskCategory::High, 0.90));
        assert_eq!(risk_category(4.5), (RiskCategory::Moderate, 0.85));
        assert_eq!(risk_category(3.0), (RiskCategory::Low, 0.80));
        assert_eq!(risk_category(2.1), (RiskCategory::Low, 0.75));
    }

    #[test]
    fn confidence_heuristic_is_bounded() {
        let (magnitude, depth) = confidences(500);
        assert!((magnitude - 0.8).abs() < 1e-12);
        assert!((depth - 0.65).abs() < 1e-12);

        let (magnitude, depth) = confidences(10_000);
        assert!((magnitude - 0.95).abs() < 1e-12);
        assert!((depth - 0.8).abs() < 1e-12);

        assert!((confidences(0).1 - 0.6).abs() < 1e-12);
    }

    #[test]
    fn forecasts_every_horizon_day() {
        let store = MemoryStore::with_events(&history(80)).unwrap();
        let params = ForecastParams {
            horizon_days: 3,
            model: ModelFamily::Linear,
            ..ForecastParams::default()
        };

        let outcome = Forecaster::new(&store, &store, &store)
            .run_at(&params, now())
            .unwrap();

        let ForecastOutcome::Forecasted {
            training_rows,
            activity_level,
            forecasts,
            ..
        } = outcome
        else {
            panic!("expected a forecast");
        };
        assert_eq!(training_rows, 80);
        assert!((activity_level - 80.0).abs() < f64::EPSILON);
        assert_eq!(forecasts.len(), 9);
        assert_eq!(forecasts[0].model_name, "Linear_Magnitude");
        assert_eq!(forecasts[1].model_name, "Linear_Depth");
        assert_eq!(forecasts[2].model_name, "Enhanced_Linear_Risk");
        assert_eq!(
            forecasts[8].target_date,
            NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
        );
        assert!(forecasts.iter().all(|f| !f.is_error()));
        assert_eq!(store.forecasts().unwrap().len(), 9);
    }

    #[test]
    fn zero_horizon_writes_nothing() {
        let store = MemoryStore::with_events(&history(80)).unwrap();
        let err = Forecaster::new(&store, &store, &store)
            .run_at(
                &ForecastParams {
                    horizon_days: 0,
                    ..ForecastParams::default()
                },
                now(),
            )
            .unwrap_err();

        assert!(matches!(err, AnalyticsError::InvalidParameter { .. }));
        assert!(store.forecasts().unwrap().is_empty());
    }

    #[test]
    fn svm_refuses_oversized_training_sets() {
        let count = u32::try_from(SVM_MAX_ROWS).unwrap() + 1;
        let store = MemoryStore::with_events(&history(count)).unwrap();
        let forecaster = Forecaster::new(&store, &store, &store);

        let err = forecaster
            .run_at(
                &ForecastParams {
                    model: ModelFamily::Svm,
                    history_limit: SVM_MAX_ROWS + 1,
                    ..ForecastParams::default()
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter { .. }));

        let err = forecaster
            .run_at(
                &ForecastParams {
                    model: ModelFamily::Svm,
                    start_date: Some("2024-05-01".to_string()),
                    end_date: Some("2024-06-01".to_string()),
                    ..ForecastParams::default()
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter { .. }));
        assert!(store.forecasts().unwrap().is_empty());
    }

    #[test]
    fn error_triple_targets_tomorrow_only() {
        let store = MemoryStore::with_events(&history(10)).unwrap();
        let outcome = Forecaster::new(&store, &store, &store)
            .run_at(
                &ForecastParams {
                    horizon_days: 5,
                    ..ForecastParams::default()
                },
                now(),
            )
            .unwrap();

        let forecasts = outcome.forecasts();
        assert_eq!(forecasts.len(), 3);
        let tomorrow = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        assert!(forecasts.iter().all(|f| f.target_date == tomorrow));
        assert!(forecasts.iter().all(|f| f.confidence.abs() < f64::EPSILON && f.is_error()));
        assert!(
            forecasts[0]
                .model_name
                .starts_with("ERROR_NO_DATA: Insufficient data")
        );
        assert_eq!(forecasts[2].label.as_deref(), Some(ERROR_RISK_LABEL));
    }
}
