//! Two-stage magnitude then depth prediction.
//!
//! The magnitude model sees `[depth, latitude, longitude, zone_id,
//! activity_level]`; the depth model sees `[magnitude, latitude, longitude,
//! zone_id, activity_level]`. At inference time the depth model is fed the
//! *predicted* magnitude rather than an observed one.

use crate::forecast::model::{ModelError, Regressor};
use crate::impute::ImputedEvent;

/// Feature row for one inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceRow {
    pub depth_km: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub zone_id: i32,
    pub activity_level: f64,
}

impl InferenceRow {
    /// Column means for depth and coordinates, the most frequent zone
    /// (first seen wins a tie) and the given activity level. `None` for an
    /// empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn summarize(rows: &[ImputedEvent], activity_level: f64) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let n = rows.len() as f64;
        let mean = |f: fn(&ImputedEvent) -> f64| rows.iter().map(f).sum::<f64>() / n;

        Some(Self {
            depth_km: mean(|r| r.depth_km),
            latitude: mean(|r| r.latitude),
            longitude: mean(|r| r.longitude),
            zone_id: mode(rows.iter().map(|r| r.zone_id))?,
            activity_level,
        })
    }
}

/// Most frequent value; among equally frequent values the one seen first.
fn mode(values: impl Iterator<Item = i32>) -> Option<i32> {
    // (value, count) in first-seen order.
    let mut counts: Vec<(i32, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None::<(i32, usize)>, |best, candidate| match best {
            Some(b) if b.1 >= candidate.1 => Some(b),
            _ => Some(candidate),
        })
        .map(|(value, _)| value)
}

/// Magnitude and depth predicted for one inference row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadedPrediction {
    pub magnitude: f64,
    pub depth_km: f64,
}

/// Paired magnitude and depth regressors.
pub struct CascadedPredictor {
    magnitude: Box<dyn Regressor>,
    depth: Box<dyn Regressor>,
}

impl CascadedPredictor {
    /// Wraps two regressors, fitted or not.
    #[must_use]
    pub fn new(magnitude: Box<dyn Regressor>, depth: Box<dyn Regressor>) -> Self {
        Self { magnitude, depth }
    }

    /// Trains both stages on the imputed batch with `activity_level`
    /// broadcast to every row.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] if either model fails to fit.
    pub fn fit(&mut self, rows: &[ImputedEvent], activity_level: f64) -> Result<(), ModelError> {
        let zone = |r: &ImputedEvent| f64::from(r.zone_id);

        let magnitude_features: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| vec![r.depth_km, r.latitude, r.longitude, zone(r), activity_level])
            .collect();
        let magnitudes: Vec<f64> = rows.iter().map(|r| r.magnitude).collect();

        let depth_features: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| vec![r.magnitude, r.latitude, r.longitude, zone(r), activity_level])
            .collect();
        let depths: Vec<f64> = rows.iter().map(|r| r.depth_km).collect();

        self.magnitude.fit(&magnitude_features, &magnitudes)?;
        self.depth.fit(&depth_features, &depths)?;
        Ok(())
    }

    /// Predicts magnitude, then depth from the predicted magnitude.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] if either model is unfitted.
    pub fn predict(&self, row: &InferenceRow) -> Result<CascadedPrediction, ModelError> {
        let zone = f64::from(row.zone_id);

        let magnitude = self.magnitude.predict(&[
            row.depth_km,
            row.latitude,
            row.longitude,
            zone,
            row.activity_level,
        ])?;
        let depth_km = self.depth.predict(&[
            magnitude,
            row.latitude,
            row.longitude,
            zone,
            row.activity_level,
        ])?;

        Ok(CascadedPrediction {
            magnitude,
            depth_km,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;

    /// Returns `scale × row[0] + offset` without training.
    struct FirstColumn {
        scale: f64,
        offset: f64,
    }

    impl Regressor for FirstColumn {
        fn fit(&mut self, _: &[Vec<f64>], _: &[f64]) -> Result<(), ModelError> {
            Ok(())
        }

        fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
            Ok(self.scale.mul_add(row[0], self.offset))
        }

        fn is_fitted(&self) -> bool {
            true
        }
    }

    fn row(zone_id: i32, depth_km: f64) -> ImputedEvent {
        ImputedEvent {
            id: format!("{zone_id}-{depth_km}"),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            magnitude: 4.0,
            depth_km,
            latitude: 10.0,
            longitude: 20.0,
            zone_id,
        }
    }

    #[test]
    fn depth_stage_consumes_predicted_magnitude() {
        let predictor = CascadedPredictor::new(
            Box::new(FirstColumn {
                scale: 0.1,
                offset: 1.0,
            }),
            Box::new(FirstColumn {
                scale: 10.0,
                offset: 0.0,
            }),
        );

        let prediction = predictor
            .predict(&InferenceRow {
                depth_km: 30.0,
                latitude: 0.0,
                longitude: 0.0,
                zone_id: 1,
                activity_level: 12.0,
            })
            .unwrap();

        assert!((prediction.magnitude - 4.0).abs() < 1e-12);
        assert!((prediction.depth_km - 40.0).abs() < 1e-12);
    }

    #[test]
    fn summary_uses_means_and_first_seen_mode() {
        let rows = vec![row(2, 10.0), row(1, 20.0), row(1, 30.0), row(2, 40.0)];
        let summary = InferenceRow::summarize(&rows, 7.0).unwrap();

        assert!((summary.depth_km - 25.0).abs() < f64::EPSILON);
        assert_eq!(summary.zone_id, 2);
        assert!((summary.activity_level - 7.0).abs() < f64::EPSILON);
        assert!(InferenceRow::summarize(&[], 1.0).is_none());
    }

    #[test]
    fn mode_prefers_higher_count() {
        assert_eq!(mode([3, 5, 5, 3, 5].into_iter()), Some(5));
        assert_eq!(mode(std::iter::empty()), None);
    }
}
