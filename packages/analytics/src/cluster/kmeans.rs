//! Seeded k-means over 2-D points.
//!
//! k-means++ initialization, Lloyd iterations until the squared centroid
//! shift falls below `tolerance × mean per-axis variance`, several restarts
//! drawn from one seeded generator, lowest inertia wins. Identical input
//! order and seed always give identical centroids.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

/// A `(latitude, longitude)` pair; degrees are used directly.
pub type Point = [f64; 2];

/// k-means settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansConfig {
    /// Number of clusters.
    pub k: usize,
    /// Independent restarts.
    pub restarts: usize,
    /// Iteration cap per restart.
    pub max_iterations: usize,
    /// Relative convergence tolerance.
    pub tolerance: f64,
    /// Generator seed.
    pub seed: u64,
}

/// A fitted clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// One centroid per cluster.
    pub centroids: Vec<Point>,
    /// Cluster index of each input point.
    pub labels: Vec<usize>,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

impl KMeansFit {
    /// Member count of each cluster.
    #[must_use]
    pub fn counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.centroids.len()];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }
}

fn squared_distance(a: &Point, b: &Point) -> f64 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    d0.mul_add(d0, d1 * d1)
}

/// Index of the nearest centroid (lowest index on ties) and its squared
/// distance.
fn nearest(point: &Point, centroids: &[Point]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, candidate| {
            if candidate.1 < best.1 { candidate } else { best }
        })
}

/// Fits k-means to `points`.
///
/// Returns `None` when `k` is zero or larger than the number of points.
#[must_use]
pub fn fit(points: &[Point], config: &KMeansConfig) -> Option<KMeansFit> {
    if config.k == 0 || points.len() < config.k {
        return None;
    }

    let threshold = config.tolerance * mean_variance(points);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<KMeansFit> = None;

    for restart in 0..config.restarts.max(1) {
        let initial = plus_plus_init(points, config.k, &mut rng);
        let (fit, iterations) = lloyd(points, initial, config.max_iterations.max(1), threshold);

        log::debug!(
            "k-means restart {restart}: inertia {:.4} after {iterations} iterations",
            fit.inertia
        );

        if best.as_ref().is_none_or(|b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }

    best
}

#[allow(clippy::cast_precision_loss)]
fn mean_variance(points: &[Point]) -> f64 {
    let n = points.len() as f64;
    let mut total = 0.0;
    for axis in 0..2 {
        let mean = points.iter().map(|p| p[axis]).sum::<f64>() / n;
        total += points.iter().map(|p| (p[axis] - mean).powi(2)).sum::<f64>() / n;
    }
    total / 2.0
}

/// k-means++ seeding: the first centroid is uniform, each next one is drawn
/// with probability proportional to its squared distance from the nearest
/// chosen centroid.
fn plus_plus_init(points: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())]);

    let mut distances: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();

        let chosen = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            distances
                .iter()
                .position(|&d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(points.len() - 1)
        } else {
            // Every point coincides with a centroid already.
            rng.random_range(0..points.len())
        };

        let centroid = points[chosen];
        for (d, p) in distances.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

/// Lloyd iterations from `centroids`. Returns the fit and the number of
/// iterations run.
fn lloyd(
    points: &[Point],
    mut centroids: Vec<Point>,
    max_iterations: usize,
    threshold: f64,
) -> (KMeansFit, usize) {
    let k = centroids.len();
    let mut labels = vec![0usize; points.len()];
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;

        for (label, point) in labels.iter_mut().zip(points) {
            *label = nearest(point, &centroids).0;
        }

        let mut sums = vec![[0.0f64; 2]; k];
        let mut counts = vec![0usize; k];
        for (&label, point) in labels.iter().zip(points) {
            sums[label][0] += point[0];
            sums[label][1] += point[1];
            counts[label] += 1;
        }

        // An empty cluster takes over the point farthest from its centroid.
        for cluster in 0..k {
            if counts[cluster] > 0 {
                continue;
            }
            let farthest = points
                .iter()
                .enumerate()
                .filter(|(i, _)| counts[labels[*i]] > 1)
                .map(|(i, p)| (i, squared_distance(p, &centroids[labels[i]])))
                .fold(None::<(usize, f64)>, |best, candidate| match best {
                    Some(b) if b.1 >= candidate.1 => Some(b),
                    _ => Some(candidate),
                });

            if let Some((i, _)) = farthest {
                let old = labels[i];
                sums[old][0] -= points[i][0];
                sums[old][1] -= points[i][1];
                counts[old] -= 1;

                labels[i] = cluster;
                sums[cluster] = points[i];
                counts[cluster] = 1;
            }
        }

        let mut shift = 0.0;
        for cluster in 0..k {
            if counts[cluster] == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let n = counts[cluster] as f64;
            let updated = [sums[cluster][0] / n, sums[cluster][1] / n];
            shift += squared_distance(&centroids[cluster], &updated);
            centroids[cluster] = updated;
        }

        if shift <= threshold {
            break;
        }
    }

    // Final assignment against the converged centroids.
    let mut inertia = 0.0;
    for (label, point) in labels.iter_mut().zip(points) {
        let (nearest_idx, distance) = nearest(point, &centroids);
        *label = nearest_idx;
        inertia += distance;
    }

    (
        KMeansFit {
            centroids,
            labels,
            inertia,
        },
        iterations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(k: usize) -> KMeansConfig {
        KMeansConfig {
            k,
            restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }

    fn three_blobs() -> Vec<Point> {
        vec![
            [10.0, 10.0],
            [10.5, 10.2],
            [9.8, 9.9],
            [-20.0, 100.0],
            [-20.3, 100.4],
            [-19.9, 99.7],
            [50.0, -120.0],
            [50.2, -120.5],
            [49.7, -119.8],
        ]
    }

    #[test]
    fn separates_obvious_blobs() {
        let points = three_blobs();
        let fit = fit(&points, &config(3)).unwrap();

        assert_eq!(fit.counts(), vec![3, 3, 3]);
        for blob in points.chunks(3).zip(fit.labels.chunks(3)) {
            let labels = blob.1;
            assert!(labels.iter().all(|&l| l == labels[0]));
        }
        assert!(fit.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn same_seed_same_centroids() {
        let points = three_blobs();
        assert_eq!(fit(&points, &config(3)), fit(&points, &config(3)));
    }

    #[test]
    fn rejects_too_few_points() {
        assert!(fit(&three_blobs()[..2], &config(3)).is_none());
        assert!(fit(&three_blobs(), &config(0)).is_none());
    }

    #[test]
    fn duplicate_points_still_yield_k_clusters() {
        let points = vec![[1.0, 1.0]; 4];
        let fit = fit(&points, &config(2)).unwrap();
        assert_eq!(fit.centroids.len(), 2);
        assert!(fit.inertia.abs() < f64::EPSILON);
        assert_eq!(fit.counts().iter().sum::<u64>(), 4);
    }

    #[test]
    fn nearest_prefers_lowest_index_on_ties() {
        let centroids = [[0.0, 1.0], [0.0, -1.0]];
        assert_eq!(nearest(&[0.0, 0.0], &centroids).0, 0);
    }
}
