//! Epsilon support vector regression with an RBF kernel.
//!
//! The dual is solved by coordinate descent over `β = α - α*` with
//! `-C ≤ β ≤ C`. The bias is folded into the kernel (`K + 1`) and the
//! targets are centered first, so there is no equality constraint to
//! maintain.

use super::{ModelError, Regressor, check_width, validate};

/// Box constraint.
pub const DEFAULT_C: f64 = 1.0;

/// Width of the insensitive tube.
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Largest training set accepted. The Gram matrix is `n²` floats, so this
/// bounds it to about 200 MB.
pub const MAX_TRAINING_ROWS: usize = 5_000;

const MAX_EPOCHS: usize = 200;
const STEP_TOLERANCE: f64 = 1e-5;

/// RBF-kernel epsilon-SVR.
#[derive(Debug, Clone)]
pub struct SupportVectorRegression {
    c: f64,
    epsilon: f64,
    gamma: f64,
    target_mean: f64,
    support: Vec<(Vec<f64>, f64)>,
    width: usize,
    fitted: bool,
}

impl Default for SupportVectorRegression {
    fn default() -> Self {
        Self::new(DEFAULT_C, DEFAULT_EPSILON)
    }
}

impl SupportVectorRegression {
    #[must_use]
    pub const fn new(c: f64, epsilon: f64) -> Self {
        Self {
            c,
            epsilon,
            gamma: 1.0,
            target_mean: 0.0,
            support: Vec::new(),
            width: 0,
            fitted: false,
        }
    }

    /// Number of training rows with a non-zero dual weight.
    #[must_use]
    pub fn support_vectors(&self) -> usize {
        self.support.len()
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let distance: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        (-self.gamma * distance).exp() + 1.0
    }
}

/// `1 / (n_features · Var(X))` over every entry of the feature matrix, or
/// `1` when the matrix is constant.
#[allow(clippy::cast_precision_loss)]
fn scale_gamma(features: &[Vec<f64>], width: usize) -> f64 {
    let count = (features.len() * width) as f64;
    let mean = features.iter().flatten().sum::<f64>() / count;
    let variance = features
        .iter()
        .flatten()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / count;

    if variance > 0.0 {
        1.0 / (width as f64 * variance)
    } else {
        1.0
    }
}

impl Regressor for SupportVectorRegression {
    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let width = validate(features, targets)?;
        let n = features.len();
        if n > MAX_TRAINING_ROWS {
            return Err(ModelError::TooManyRows {
                max: MAX_TRAINING_ROWS,
                actual: n,
            });
        }

        self.gamma = scale_gamma(features, width);
        self.target_mean = targets.iter().sum::<f64>() / n as f64;

        let gram: Vec<Vec<f64>> = features
            .iter()
            .map(|a| features.iter().map(|b| self.kernel(a, b)).collect())
            .collect();

        let mut beta = vec![0.0; n];
        // Running `Kβ`.
        let mut fitted = vec![0.0; n];
        let mut epochs = 0;

        while epochs < MAX_EPOCHS {
            epochs += 1;
            let mut largest_step = 0.0f64;

            for i in 0..n {
                let kii = gram[i][i];
                let gradient = fitted[i] - (targets[i] - self.target_mean);
                let z = beta[i] - gradient / kii;
                let shrunk = z.signum() * (z.abs() - self.epsilon / kii).max(0.0);
                let updated = shrunk.clamp(-self.c, self.c);

                let step = updated - beta[i];
                if step != 0.0 {
                    for (f, k) in fitted.iter_mut().zip(&gram[i]) {
                        *f = step.mul_add(*k, *f);
                    }
                    beta[i] = updated;
                    largest_step = largest_step.max(step.abs());
                }
            }

            if largest_step < STEP_TOLERANCE {
                break;
            }
        }

        self.support = features
            .iter()
            .zip(beta)
            .filter(|(_, b)| *b != 0.0)
            .map(|(row, b)| (row.clone(), b))
            .collect();
        self.width = width;
        self.fitted = true;

        log::debug!(
            "SVR converged after {epochs} epochs with {} support vectors (gamma {:.4})",
            self.support.len(),
            self.gamma
        );
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        if !self.fitted {
            return Err(ModelError::NotFitted);
        }
        check_width(row, self.width)?;

        Ok(self
            .support
            .iter()
            .fold(self.target_mean, |acc, (sv, beta)| {
                beta.mul_add(self.kernel(sv, row), acc)
            }))
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}
