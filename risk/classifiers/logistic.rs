use super::{
    ClassifierError, DecisionMargin, ProbabilisticClassifier, sigmoid, validate_training_input,
};
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

const CONVERGENCE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    L2,
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularisation strength.
    pub c: f64,
    pub penalty: Penalty,
    pub max_iterations: usize,
}

impl fmt::Display for LogisticParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C={}, penalty={}", self.c, self.penalty)
    }
}

/// Penalised logistic regression with an unpenalised intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    weights: Array1<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn from_parts(weights: Array1<f64>, intercept: f64) -> Self {
        Self { weights, intercept }
    }

    /// Minimises `C * sum(log-loss) + penalty(w)` by accelerated proximal
    /// gradient descent (FISTA). The L1 proximal step is soft-thresholding.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &LogisticParams,
    ) -> Result<Self, ClassifierError> {
        validate_training_input(x, y)?;
        if !(params.c > 0.0 && params.c.is_finite()) {
            return Err(ClassifierError::InvalidParameter(format!(
                "logistic regression needs a positive finite C (got {})",
                params.c
            )));
        }

        let n = x.nrows() as f64;
        let p = x.ncols();
        let lambda = 1.0 / (n * params.c);
        let mean_sq_norm = x.iter().map(|v| v * v).sum::<f64>() / n;
        let mut lipschitz = 0.25 * (mean_sq_norm + 1.0);
        if params.penalty == Penalty::L2 {
            lipschitz += lambda;
        }
        let step = 1.0 / lipschitz;

        let mut w = Array1::<f64>::zeros(p);
        let mut b = 0.0;
        let mut w_momentum = w.clone();
        let mut b_momentum = b;
        let mut t = 1.0_f64;

        for iteration in 0..params.max_iterations.max(1) {
            let eta = x.dot(&w_momentum) + b_momentum;
            let residual = eta.mapv(sigmoid) - y;
            let mut grad_w = x.t().dot(&residual) / n;
            let grad_b = residual.sum() / n;
            if params.penalty == Penalty::L2 {
                grad_w.scaled_add(lambda, &w_momentum);
            }

            let mut w_next = &w_momentum - &(grad_w * step);
            let b_next = b_momentum - step * grad_b;
            if params.penalty == Penalty::L1 {
                let shrink = step * lambda;
                w_next.mapv_inplace(|v| v.signum() * (v.abs() - shrink).max(0.0));
            }

            let change = w_next
                .iter()
                .zip(w.iter())
                .map(|(a, c)| (a - c).abs())
                .fold((b_next - b).abs(), f64::max);

            let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            let momentum = (t - 1.0) / t_next;
            w_momentum = &w_next + &((&w_next - &w) * momentum);
            b_momentum = b_next + momentum * (b_next - b);
            w = w_next;
            b = b_next;
            t = t_next;

            if !change.is_finite() {
                return Err(ClassifierError::Diverged("LogisticRegression"));
            }
            if change < CONVERGENCE_TOLERANCE {
                debug!("Logistic regression converged after {} iterations", iteration + 1);
                break;
            }
        }

        Ok(Self {
            weights: w,
            intercept: b,
        })
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl DecisionMargin for LogisticRegression {
    fn decision_margin(&self, row: ArrayView1<f64>) -> f64 {
        row.dot(&self.weights) + self.intercept
    }
}

impl ProbabilisticClassifier for LogisticRegression {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.decision_margin(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::separable_blobs;
    use ndarray::array;

    #[test]
    fn l2_model_learns_the_signal_direction() {
        let (x, y) = separable_blobs(100, 2, 17);
        let params = LogisticParams {
            c: 1.0,
            penalty: Penalty::L2,
            max_iterations: 1000,
        };
        let model = LogisticRegression::fit(x.view(), y.view(), &params).unwrap();
        assert!(model.weights()[0] > 0.0);
        let probs = model.predict_probabilities(x.view());
        assert!(crate::metrics::roc_auc(y.view(), probs.view()) > 0.95);
    }

    #[test]
    fn strong_l1_penalty_zeroes_noise_weights() {
        let (x, y) = separable_blobs(100, 4, 23);
        let params = LogisticParams {
            c: 0.01,
            penalty: Penalty::L1,
            max_iterations: 1000,
        };
        let model = LogisticRegression::fit(x.view(), y.view(), &params).unwrap();
        let zeros = model.weights().iter().filter(|w| **w == 0.0).count();
        assert!(zeros >= 2, "weights were {:?}", model.weights());
    }

    #[test]
    fn margin_matches_hand_computed_logit() {
        let model = LogisticRegression::from_parts(array![2.0, -1.0], 0.5);
        let row = array![1.0, 3.0];
        assert_eq!(model.decision_margin(row.view()), -0.5);
        assert!((model.predict_probability(row.view()) - sigmoid(-0.5)).abs() < 1e-15);
    }
}
