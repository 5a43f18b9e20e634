use super::tree::{DecisionTree, TreeParams, mean_leaf, normalize_gains};
use super::{ClassifierError, FeatureImportance, ProbabilisticClassifier, validate_training_input};
use log::debug;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl fmt::Display for RandomForestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let depth = self
            .max_depth
            .map_or_else(|| "none".to_string(), |d| d.to_string());
        write!(
            f,
            "n_estimators={}, max_depth={}, min_samples_split={}",
            self.n_estimators, depth, self.min_samples_split
        )
    }
}

/// Bagged CART trees with sqrt(p) features considered per split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &RandomForestParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        validate_training_input(x, y)?;
        if params.n_estimators == 0 {
            return Err(ClassifierError::InvalidParameter(
                "random forest needs at least one tree".to_string(),
            ));
        }

        let n = x.nrows();
        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            max_features: Some(((n_features as f64).sqrt() as usize).max(1)),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importance_sum = vec![0.0; n_features];

        for _ in 0..params.n_estimators {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let grown = DecisionTree::grow(x, y, bootstrap, &tree_params, &mut rng, &|s: &[usize]| {
                mean_leaf(y, s)
            });
            for (acc, g) in importance_sum.iter_mut().zip(normalize_gains(&grown.gains)) {
                *acc += g;
            }
            trees.push(grown.tree);
        }

        let forest = Self {
            trees,
            importances: normalize_gains(&importance_sum),
        };
        if !forest.trees.iter().all(DecisionTree::is_finite) {
            return Err(ClassifierError::Diverged("RandomForest"));
        }
        debug!(
            "Random forest grew {} trees with {} nodes",
            forest.n_trees(),
            forest.trees.iter().map(DecisionTree::node_count).sum::<usize>()
        );
        Ok(forest)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ProbabilisticClassifier for RandomForest {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        total / self.trees.len() as f64
    }
}

impl FeatureImportance for RandomForest {
    fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::separable_blobs;
    use approx::assert_abs_diff_eq;

    #[test]
    fn forest_ranks_separable_classes() {
        let (x, y) = separable_blobs(80, 3, 11);
        let params = RandomForestParams {
            n_estimators: 15,
            max_depth: Some(4),
            min_samples_split: 2,
        };
        let forest = RandomForest::fit(x.view(), y.view(), &params, 42).unwrap();
        let probs = forest.predict_probabilities(x.view());
        let auc = crate::metrics::roc_auc(y.view(), probs.view());
        assert!(auc > 0.95, "auc was {auc}");
        assert_eq!(forest.n_trees(), 15);
        let total: f64 = forest.feature_importances().iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn same_seed_gives_identical_forest() {
        let (x, y) = separable_blobs(40, 2, 3);
        let params = RandomForestParams {
            n_estimators: 5,
            max_depth: None,
            min_samples_split: 2,
        };
        let a = RandomForest::fit(x.view(), y.view(), &params, 9).unwrap();
        let b = RandomForest::fit(x.view(), y.view(), &params, 9).unwrap();
        assert_eq!(a, b);
    }
}
