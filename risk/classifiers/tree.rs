//! CART regression tree shared by the random forest and gradient boosting.
//!
//! Splits minimise the summed squared error of the target. For 0/1 targets this
//! ranks candidate splits exactly as Gini impurity does, so the same learner
//! serves classification forests and the residual trees of boosting.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

/// Splits whose gain does not exceed this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Growth controls for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Number of features drawn at random per node; `None` considers all.
    pub max_features: Option<usize>,
}

/// A fitted tree stored as a flat node table; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

/// A freshly grown tree together with its unnormalised per-feature gains.
pub(crate) struct GrownTree {
    pub tree: DecisionTree,
    pub gains: Vec<f64>,
}

impl DecisionTree {
    /// Grows a tree on the rows named by `samples` (duplicates allowed, as in a
    /// bootstrap draw). `leaf_value` maps the samples that reach a leaf to the
    /// value stored there.
    pub(crate) fn grow<R: Rng>(
        x: ArrayView2<f64>,
        target: ArrayView1<f64>,
        samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut R,
        leaf_value: &dyn Fn(&[usize]) -> f64,
    ) -> GrownTree {
        let mut builder = Builder {
            x,
            target,
            params,
            leaf_value,
            nodes: Vec::new(),
            gains: vec![0.0; x.ncols()],
        };
        builder.build(samples, 0, rng);
        GrownTree {
            tree: DecisionTree {
                nodes: builder.nodes,
            },
            gains: builder.gains,
        }
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_finite(&self) -> bool {
        self.nodes.iter().all(|node| match node {
            TreeNode::Leaf { value } => value.is_finite(),
            TreeNode::Split { threshold, .. } => threshold.is_finite(),
        })
    }
}

/// Normalises raw per-feature gains so they sum to one (all zeros stay zero).
pub(crate) fn normalize_gains(gains: &[f64]) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total > 0.0 {
        gains.iter().map(|g| g / total).collect()
    } else {
        vec![0.0; gains.len()]
    }
}

struct Builder<'x, 't, 'p, 'l> {
    x: ArrayView2<'x, f64>,
    target: ArrayView1<'t, f64>,
    params: &'p TreeParams,
    leaf_value: &'l dyn Fn(&[usize]) -> f64,
    nodes: Vec<TreeNode>,
    gains: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Builder<'_, '_, '_, '_> {
    fn build<R: Rng>(&mut self, samples: Vec<usize>, depth: usize, rng: &mut R) -> usize {
        let node_idx = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { value: 0.0 });

        let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let t = self.target[i];
            (s + t, sq + t * t)
        });
        let n = samples.len() as f64;
        let node_sse = sum_sq - sum * sum / n;

        let depth_exhausted = self.params.max_depth.is_some_and(|limit| depth >= limit);
        let splittable = samples.len() >= self.params.min_samples_split.max(2)
            && !depth_exhausted
            && node_sse > MIN_GAIN;

        let best = if splittable {
            self.find_split(&samples, sum, sum_sq, node_sse, rng)
        } else {
            None
        };

        match best {
            Some(split) => {
                self.gains[split.feature] += split.gain;
                let (left, right): (Vec<usize>, Vec<usize>) = samples
                    .into_iter()
                    .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
                let left_idx = self.build(left, depth + 1, rng);
                let right_idx = self.build(right, depth + 1, rng);
                self.nodes[node_idx] = TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: left_idx,
                    right: right_idx,
                };
            }
            None => {
                self.nodes[node_idx] = TreeNode::Leaf {
                    value: (self.leaf_value)(samples.as_slice()),
                };
            }
        }
        node_idx
    }

    fn find_split<R: Rng>(
        &self,
        samples: &[usize],
        sum: f64,
        sum_sq: f64,
        node_sse: f64,
        rng: &mut R,
    ) -> Option<BestSplit> {
        let n_features = self.x.ncols();
        let candidates: Vec<usize> = match self.params.max_features {
            Some(k) if k < n_features => index::sample(rng, n_features, k.max(1)).into_vec(),
            _ => (0..n_features).collect(),
        };

        let n = samples.len();
        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        for feature in candidates {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let t = self.target[order[pos]];
                left_sum += t;
                left_sq += t * t;

                let current = self.x[[order[pos], feature]];
                let next = self.x[[order[pos + 1], feature]];
                if current >= next {
                    continue;
                }

                let n_left = (pos + 1) as f64;
                let n_right = (n - pos - 1) as f64;
                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / n_left;
                let right_sse = right_sq - right_sum * right_sum / n_right;
                let gain = node_sse - left_sse - right_sse;

                let improves = match &best {
                    Some(b) => gain > b.gain + MIN_GAIN,
                    None => gain > MIN_GAIN,
                };
                if improves {
                    let mut threshold = 0.5 * (current + next);
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Mean of the target over `samples`; the leaf rule for classification forests.
pub(crate) fn mean_leaf(target: ArrayView1<f64>, samples: &[usize]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&i| target[i]).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn single_split_separates_two_groups() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let params = TreeParams {
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let yv = y.view();
        let grown = DecisionTree::grow(
            x.view(),
            yv,
            (0..6).collect(),
            &params,
            &mut rng,
            &|s: &[usize]| mean_leaf(yv, s),
        );
        assert_eq!(grown.tree.node_count(), 3);
        assert_eq!(grown.tree.predict(array![2.5].view()), 0.0);
        assert_eq!(grown.tree.predict(array![9.0].view()), 1.0);
        assert!(grown.gains[0] > 0.0);
    }

    #[test]
    fn depth_limit_produces_a_stump() {
        let x = array![[0.0, 5.0], [1.0, 4.0], [2.0, 3.0], [3.0, 2.0]];
        let y = array![0.0, 1.0, 0.0, 1.0];
        let params = TreeParams {
            max_depth: Some(0),
            min_samples_split: 2,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let yv = y.view();
        let grown = DecisionTree::grow(
            x.view(),
            yv,
            (0..4).collect(),
            &params,
            &mut rng,
            &|s: &[usize]| mean_leaf(yv, s),
        );
        assert_eq!(grown.tree.node_count(), 1);
        assert_eq!(grown.tree.predict(x.row(0)), 0.5);
    }

    #[test]
    fn gains_normalize_to_one() {
        let normalized = normalize_gains(&[1.0, 3.0, 0.0]);
        assert_eq!(normalized, vec![0.25, 0.75, 0.0]);
        assert_eq!(normalize_gains(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
