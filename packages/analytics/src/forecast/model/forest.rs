//! Bootstrap ensemble of CART regression trees.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use super::{ModelError, Regressor, check_width, validate};

/// Trees stop splitting below this depth.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn grow(features: &[Vec<f64>], targets: &[f64], sample: Vec<usize>) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(features, targets, sample, 0);
        tree
    }

    fn build(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample: Vec<usize>,
        depth: usize,
    ) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf(mean(targets, &sample)));

        if depth >= MAX_DEPTH || sample.len() < 2 {
            return index;
        }
        let Some((feature, threshold)) = best_split(features, targets, &sample) else {
            return index;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&i| features[i][feature] <= threshold);

        let left = self.build(features, targets, left, depth + 1);
        let right = self.build(features, targets, right, depth + 1);
        self.nodes[index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(targets: &[f64], sample: &[usize]) -> f64 {
    sample.iter().map(|&i| targets[i]).sum::<f64>() / sample.len() as f64
}

/// Finds the split with the largest reduction in squared error, or `None`
/// when no split improves on the parent (for example a constant target or
/// constant features).
#[allow(clippy::cast_precision_loss)]
fn best_split(features: &[Vec<f64>], targets: &[f64], sample: &[usize]) -> Option<(usize, f64)> {
    let n = sample.len() as f64;
    let total: f64 = sample.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = sample.iter().map(|&i| targets[i] * targets[i]).sum();
    let parent_sse = total.mul_add(-total / n, total_sq);
    if parent_sse <= f64::EPSILON {
        return None;
    }

    let width = features[sample[0]].len();
    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = sample.to_vec();

    for feature in 0..width {
        order.sort_by(|&a, &b| features[a][feature].total_cmp(&features[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for position in 0..order.len() - 1 {
            let y = targets[order[position]];
            left_sum += y;
            left_sq += y * y;

            let here = features[order[position]][feature];
            let next = features[order[position + 1]][feature];
            if here >= next {
                continue;
            }

            let left_n = (position + 1) as f64;
            let right_n = n - left_n;
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = left_sum.mul_add(-left_sum / left_n, left_sq)
                + right_sum.mul_add(-right_sum / right_n, right_sq);

            if best.is_none_or(|(_, _, best_sse)| sse < best_sse) {
                best = Some((feature, f64::midpoint(here, next), sse));
            }
        }
    }

    best.filter(|&(_, _, sse)| sse < parent_sse)
        .map(|(feature, threshold, _)| (feature, threshold))
}

/// Random forest regressor: each tree is grown to full depth on a
/// bootstrap resample, predictions are averaged.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: usize,
    seed: u64,
    width: usize,
    fitted: Vec<Tree>,
}

impl RandomForest {
    #[must_use]
    pub const fn new(trees: usize, seed: u64) -> Self {
        Self {
            trees,
            seed,
            width: 0,
            fitted: Vec::new(),
        }
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let width = validate(features, targets)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = features.len();

        let fitted: Vec<Tree> = (0..self.trees.max(1))
            .map(|_| {
                let sample = (0..n).map(|_| rng.random_range(0..n)).collect();
                Tree::grow(features, targets, sample)
            })
            .collect();

        log::debug!(
            "Grew {} trees on {n} rows (largest has {} nodes)",
            fitted.len(),
            fitted.iter().map(|t| t.nodes.len()).max().unwrap_or(0)
        );

        self.width = width;
        self.fitted = fitted;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        if self.fitted.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_width(row, self.width)?;

        let sum: f64 = self.fitted.iter().map(|tree| tree.predict(row)).sum();
        Ok(sum / self.fitted.len() as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.fitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tree_learns_a_step() {
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![f64::from(i)]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();

        let all = (0..features.len()).collect();
        let tree = Tree::grow(&features, &targets, all);

        assert!((tree.predict(&[2.0]) - 1.0).abs() < f64::EPSILON);
        assert!((tree.predict(&[15.0]) - 5.0).abs() < f64::EPSILON);
        assert!((tree.predict(&[9.5]) - 1.0).abs() < f64::EPSILON);
        assert!((tree.predict(&[9.7]) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let tree = Tree::grow(&features, &[4.0, 4.0, 4.0], vec![0, 1, 2]);
        assert_eq!(tree.nodes.len(), 1);
    }

    #[test]
    fn same_seed_same_forest() {
        let features: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![f64::from(i), f64::from(i % 7)])
            .collect();
        let targets: Vec<f64> = (0..40).map(|i| f64::from(i % 5)).collect();

        let mut a = RandomForest::new(10, 9);
        let mut b = RandomForest::new(10, 9);
        a.fit(&features, &targets).unwrap();
        b.fit(&features, &targets).unwrap();

        let row = [13.0, 3.0];
        assert!((a.predict(&row).unwrap() - b.predict(&row).unwrap()).abs() < f64::EPSILON);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut forest = RandomForest::new(2, 1);
        forest.fit(&[vec![1.0, 2.0], vec![2.0, 3.0]], &[1.0, 2.0]).unwrap();
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}
