//! Real-valued regressors used by the forecaster.
//!
//! Every model implements [`Regressor`]: `fit` on a row-major feature
//! matrix and a target column, then `predict` one row at a time.

pub mod forest;
pub mod linear;
pub mod svr;

use quakewatch_analytics_models::ModelFamily;
use thiserror::Error;

pub use forest::RandomForest;
pub use linear::LinearRegression;
pub use svr::SupportVectorRegression;

/// Errors raised while fitting or querying a regressor.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Nothing to train on.
    #[error("Cannot fit a model on an empty training set")]
    EmptyTrainingSet,

    /// Feature rows and targets disagree in length, or a row has the wrong
    /// width.
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A feature or target is NaN or infinite.
    #[error("Training data contains a non-finite value")]
    NonFinite,

    /// The model cannot train on this many rows.
    #[error("Training set of {actual} rows exceeds the {max}-row limit")]
    TooManyRows {
        /// Largest supported training set.
        max: usize,
        /// Rows supplied.
        actual: usize,
    },

    /// `predict` was called before `fit`.
    #[error("Model has not been fitted")]
    NotFitted,
}

/// A trainable real-valued predictor.
pub trait Regressor: Send {
    /// Trains on `features` (one row per sample) against `targets`.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] if the training data is empty, ragged or
    /// not finite.
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError>;

    /// Predicts the target for one feature row.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotFitted`] before a successful `fit`, or
    /// [`ModelError::ShapeMismatch`] if `row` has the wrong width.
    fn predict(&self, row: &[f64]) -> Result<f64, ModelError>;

    /// Whether `fit` has succeeded.
    fn is_fitted(&self) -> bool;
}

/// Builds an unfitted regressor of the given family.
#[must_use]
pub fn build(family: ModelFamily, trees: usize, seed: u64) -> Box<dyn Regressor> {
    match family {
        ModelFamily::RandomForest => Box::new(RandomForest::new(trees, seed)),
        ModelFamily::Linear => Box::new(LinearRegression::default()),
        ModelFamily::Svm => Box::new(SupportVectorRegression::default()),
    }
}

/// Checks a training set and returns its feature width.
pub(crate) fn validate(features: &[Vec<f64>], targets: &[f64]) -> Result<usize, ModelError> {
    let Some(first) = features.first() else {
        return Err(ModelError::EmptyTrainingSet);
    };
    if features.len() != targets.len() {
        return Err(ModelError::ShapeMismatch {
            expected: features.len(),
            actual: targets.len(),
        });
    }

    let width = first.len();
    for row in features {
        if row.len() != width {
            return Err(ModelError::ShapeMismatch {
                expected: width,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
    }
    if targets.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite);
    }

    Ok(width)
}

pub(crate) const fn check_width(row: &[f64], width: usize) -> Result<(), ModelError> {
    if row.len() == width {
        Ok(())
    } else {
        Err(ModelError::ShapeMismatch {
            expected: width,
            actual: row.len(),
        })
    }
}
