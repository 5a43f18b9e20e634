use super::tree::{DecisionTree, TreeParams, normalize_gains};
use super::{
    ClassifierError, DecisionMargin, FeatureImportance, ProbabilisticClassifier, sigmoid,
    validate_training_input,
};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Newton leaf denominators below this produce a zero-valued leaf.
const MIN_HESSIAN: f64 = 1e-150;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl fmt::Display for GradientBoostingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n_estimators={}, learning_rate={}, max_depth={}",
            self.n_estimators, self.learning_rate, self.max_depth
        )
    }
}

/// Binomial-deviance gradient boosting with Newton-step leaf values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init_score: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &GradientBoostingParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        validate_training_input(x, y)?;
        if params.n_estimators == 0 || params.learning_rate <= 0.0 {
            return Err(ClassifierError::InvalidParameter(format!(
                "gradient boosting needs positive stages and learning rate (got {params})"
            )));
        }

        let n = x.nrows();
        let prior = y.mean().unwrap_or(0.5).clamp(1e-6, 1.0 - 1e-6);
        let init_score = (prior / (1.0 - prior)).ln();

        let tree_params = TreeParams {
            max_depth: Some(params.max_depth),
            min_samples_split: params.min_samples_split,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut raw = Array1::from_elem(n, init_score);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importance_sum = vec![0.0; x.ncols()];

        for _ in 0..params.n_estimators {
            let prob = raw.mapv(sigmoid);
            let residual = &y - &prob;
            let hessian = prob.mapv(|p| p * (1.0 - p));

            let rv = residual.view();
            let hv = hessian.view();
            let grown = DecisionTree::grow(
                x,
                rv,
                (0..n).collect(),
                &tree_params,
                &mut rng,
                &|s: &[usize]| {
                    let numerator: f64 = s.iter().map(|&i| rv[i]).sum();
                    let denominator: f64 = s.iter().map(|&i| hv[i]).sum();
                    if denominator.abs() < MIN_HESSIAN {
                        0.0
                    } else {
                        numerator / denominator
                    }
                },
            );

            for (i, row) in x.outer_iter().enumerate() {
                raw[i] += params.learning_rate * grown.tree.predict(row);
            }
            for (acc, g) in importance_sum.iter_mut().zip(normalize_gains(&grown.gains)) {
                *acc += g;
            }
            trees.push(grown.tree);
        }

        if !raw.iter().all(|v| v.is_finite()) || !trees.iter().all(DecisionTree::is_finite) {
            return Err(ClassifierError::Diverged("GradientBoosting"));
        }

        Ok(Self {
            init_score,
            learning_rate: params.learning_rate,
            trees,
            importances: normalize_gains(&importance_sum),
        })
    }

    pub fn n_stages(&self) -> usize {
        self.trees.len()
    }
}

impl DecisionMargin for GradientBoosting {
    fn decision_margin(&self, row: ArrayView1<f64>) -> f64 {
        self.trees
            .iter()
            .fold(self.init_score, |acc, t| acc + self.learning_rate * t.predict(row))
    }
}

impl ProbabilisticClassifier for GradientBoosting {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.decision_margin(row))
    }
}

impl FeatureImportance for GradientBoosting {
    fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}
