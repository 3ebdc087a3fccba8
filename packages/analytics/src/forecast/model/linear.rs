//! Ordinary least squares with an intercept.

use super::{ModelError, Regressor, check_width, validate};

/// Ridge term added to the normal equations, relative to the mean diagonal.
/// Keeps constant columns (a broadcast feature) from making them singular.
const RIDGE: f64 = 1e-10;

/// Least-squares linear regression, solved on centered features.
#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    coefficients: Vec<f64>,
    feature_means: Vec<f64>,
    intercept: f64,
    fitted: bool,
}

impl LinearRegression {
    /// Fitted slope per feature.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl Regressor for LinearRegression {
    #[allow(clippy::cast_precision_loss, clippy::needless_range_loop)]
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let width = validate(features, targets)?;
        let n = features.len() as f64;

        let means: Vec<f64> = (0..width)
            .map(|j| features.iter().map(|row| row[j]).sum::<f64>() / n)
            .collect();
        let target_mean = targets.iter().sum::<f64>() / n;

        // Normal equations over centered data: (XᵀX + λI) β = Xᵀy.
        let mut gram = vec![vec![0.0; width]; width];
        let mut moment = vec![0.0; width];
        for (row, &y) in features.iter().zip(targets) {
            let y = y - target_mean;
            for a in 0..width {
                let xa = row[a] - means[a];
                moment[a] += xa * y;
                for b in a..width {
                    gram[a][b] += xa * (row[b] - means[b]);
                }
            }
        }
        for a in 0..width {
            for b in 0..a {
                gram[a][b] = gram[b][a];
            }
        }

        let diagonal = (0..width).map(|j| gram[j][j]).sum::<f64>() / width.max(1) as f64;
        let ridge = RIDGE * diagonal.max(1.0);
        for j in 0..width {
            gram[j][j] += ridge;
        }

        let coefficients = solve(gram, moment);
        let intercept = coefficients
            .iter()
            .zip(&means)
            .fold(target_mean, |acc, (beta, mean)| beta.mul_add(-mean, acc));

        self.coefficients = coefficients;
        self.feature_means = means;
        self.intercept = intercept;
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        if !self.fitted {
            return Err(ModelError::NotFitted);
        }
        check_width(row, self.coefficients.len())?;

        Ok(self
            .coefficients
            .iter()
            .zip(row)
            .fold(self.intercept, |acc, (beta, x)| beta.mul_add(*x, acc)))
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

/// Gaussian elimination with partial pivoting on a symmetric positive
/// definite system. A vanishing pivot leaves that coefficient at zero.
#[allow(clippy::needless_range_loop)]
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        if diag.abs() <= f64::MIN_POSITIVE {
            continue;
        }
        for row in col + 1..n {
            let factor = a[row][col] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] = factor.mul_add(-a[col][k], a[row][k]);
            }
            b[row] = factor.mul_add(-b[col], b[row]);
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let diag = a[row][row];
        if diag.abs() <= f64::MIN_POSITIVE {
            continue;
        }
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / diag;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_line() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i)]).collect();
        let targets: Vec<f64> = (0..10).map(|i| 0.5f64.mul_add(f64::from(i), 1.0)).collect();

        let mut model = LinearRegression::default();
        model.fit(&features, &targets).unwrap();

        assert!((model.coefficients()[0] - 0.5).abs() < 1e-6);
        assert!((model.predict(&[20.0]).unwrap() - 11.0).abs() < 1e-5);
    }

    #[test]
    fn constant_column_does_not_break_the_fit() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i), 120.0]).collect();
        let targets: Vec<f64> = (0..10).map(|i| 3.0 - f64::from(i)).collect();

        let mut model = LinearRegression::default();
        model.fit(&features, &targets).unwrap();

        assert!(model.coefficients()[1].abs() < 1e-6);
        assert!((model.predict(&[4.0, 120.0]).unwrap() + 1.0).abs() < 1e-5);
    }

    #[test]
    fn single_row_predicts_its_target() {
        let mut model = LinearRegression::default();
        model.fit(&[vec![2.0, 3.0]], &[7.5]).unwrap();
        assert!((model.predict(&[9.0, 9.0]).unwrap() - 7.5).abs() < 1e-9);
    }
}
