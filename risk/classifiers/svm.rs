use super::{ClassifierError, DecisionMargin, ProbabilisticClassifier, validate_training_input};
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stop when the spread of projected gradients falls below this.
const DUAL_TOLERANCE: f64 = 1e-3;
const PLATT_MAX_ITERATIONS: usize = 100;
const PLATT_MIN_STEP: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub c: f64,
    pub max_epochs: usize,
}

impl fmt::Display for SvmParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C={}", self.c)
    }
}

/// Linear hinge-loss SVM whose margins are mapped to probabilities by a
/// Platt sigmoid `1 / (1 + exp(a * f + b))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    weights: Array1<f64>,
    bias: f64,
    platt_a: f64,
    platt_b: f64,
}

impl LinearSvm {
    /// Dual coordinate descent on the L1-loss SVM with the bias folded in as a
    /// constant feature, followed by a Platt fit on the training margins.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &SvmParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        validate_training_input(x, y)?;
        if !(params.c > 0.0 && params.c.is_finite()) {
            return Err(ClassifierError::InvalidParameter(format!(
                "SVM needs a positive finite C (got {})",
                params.c
            )));
        }

        let n = x.nrows();
        let signs: Vec<f64> = y.iter().map(|&v| if v > 0.5 { 1.0 } else { -1.0 }).collect();
        let q_diag: Vec<f64> = x.outer_iter().map(|row| row.dot(&row) + 1.0).collect();

        let mut alpha = vec![0.0; n];
        let mut w = Array1::<f64>::zeros(x.ncols());
        let mut b = 0.0;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        for epoch in 0..params.max_epochs.max(1) {
            order.shuffle(&mut rng);
            let mut max_pg = f64::NEG_INFINITY;
            let mut min_pg = f64::INFINITY;

            for &i in &order {
                let row = x.row(i);
                let gradient = signs[i] * (row.dot(&w) + b) - 1.0;
                let projected = if alpha[i] <= 0.0 {
                    gradient.min(0.0)
                } else if alpha[i] >= params.c {
                    gradient.max(0.0)
                } else {
                    gradient
                };
                max_pg = max_pg.max(projected);
                min_pg = min_pg.min(projected);

                if projected.abs() > 1e-12 {
                    let previous = alpha[i];
                    alpha[i] = (previous - gradient / q_diag[i]).clamp(0.0, params.c);
                    let delta = (alpha[i] - previous) * signs[i];
                    w.scaled_add(delta, &row);
                    b += delta;
                }
            }

            if max_pg - min_pg < DUAL_TOLERANCE {
                debug!("Linear SVM converged after {} epochs", epoch + 1);
                break;
            }
        }

        if !w.iter().all(|v| v.is_finite()) || !b.is_finite() {
            return Err(ClassifierError::Diverged("SVM"));
        }

        let margins: Vec<f64> = x.outer_iter().map(|row| row.dot(&w) + b).collect();
        let (platt_a, platt_b) = finite_platt(fit_platt(&margins, &signs))?;

        Ok(Self {
            weights: w,
            bias: b,
            platt_a,
            platt_b,
        })
    }
}

impl DecisionMargin for LinearSvm {
    fn decision_margin(&self, row: ArrayView1<f64>) -> f64 {
        row.dot(&self.weights) + self.bias
    }
}

impl ProbabilisticClassifier for LinearSvm {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        let f_apb = self.platt_a * self.decision_margin(row) + self.platt_b;
        if f_apb >= 0.0 {
            let e = (-f_apb).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + f_apb.exp())
        }
    }
}

/// Rejects a sigmoid that would not survive serialization.
fn finite_platt((a, b): (f64, f64)) -> Result<(f64, f64), ClassifierError> {
    if a.is_finite() && b.is_finite() {
        Ok((a, b))
    } else {
        Err(ClassifierError::Diverged("SVM"))
    }
}

/// Platt's sigmoid fit with the Newton/backtracking scheme of Lin, Lin & Weng.
/// `signs` holds +1/-1 labels. Returns `(a, b)`.
fn fit_platt(margins: &[f64], signs: &[f64]) -> (f64, f64) {
    let prior1 = signs.iter().filter(|s| **s > 0.0).count() as f64;
    let prior0 = signs.len() as f64 - prior1;
    let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
    let lo_target = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = signs
        .iter()
        .map(|s| if *s > 0.0 { hi_target } else { lo_target })
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        margins
            .iter()
            .zip(&targets)
            .map(|(f, t)| {
                let f_apb = f * a + b;
                if f_apb >= 0.0 {
                    t * f_apb + (1.0 + (-f_apb).exp()).ln()
                } else {
                    (t - 1.0) * f_apb + (1.0 + f_apb.exp()).ln()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut fval = objective(a, b);
    let sigma = 1e-12;

    for _ in 0..PLATT_MAX_ITERATIONS {
        let (mut h11, mut h22, mut h21) = (sigma, sigma, 0.0);
        let (mut g1, mut g2) = (0.0, 0.0);
        for (f, t) in margins.iter().zip(&targets) {
            let f_apb = f * a + b;
            let (p, q) = if f_apb >= 0.0 {
                let e = (-f_apb).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = f_apb.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= PLATT_MIN_STEP {
            let new_a = a + step * da;
            let new_b = b + step * db;
            let new_f = objective(new_a, new_b);
            if new_f < fval + 1e-4 * step * gd {
                a = new_a;
                b = new_b;
                fval = new_f;
                break;
            }
            step /= 2.0;
        }
        if step < PLATT_MIN_STEP {
            debug!("Platt scaling line search stalled");
            break;
        }
    }
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::separable_blobs;

    #[test]
    fn svm_margin_and_probability_agree_in_sign() {
        let (x, y) = separable_blobs(80, 2, 29);
        let params = SvmParams {
            c: 1.0,
            max_epochs: 200,
        };
        let model = LinearSvm::fit(x.view(), y.view(), &params, 42).unwrap();
        let probs = model.predict_probabilities(x.view());
        assert!(crate::metrics::roc_auc(y.view(), probs.view()) > 0.95);
        for row in x.outer_iter() {
            let margin = model.decision_margin(row);
            let prob = model.predict_probability(row);
            if margin > 1.0 {
                assert!(prob > 0.5);
            } else if margin < -1.0 {
                assert!(prob < 0.5);
            }
        }
    }

    #[test]
    fn platt_fit_is_monotone_increasing() {
        let margins = [-2.0, -1.0, -0.5, 0.5, 1.0, 2.0];
        let signs = [-1.0, -1.0, 1.0, -1.0, 1.0, 1.0];
        let (a, _) = fit_platt(&margins, &signs);
        assert!(a < 0.0);
    }

    #[test]
    fn non_finite_platt_parameters_are_a_divergence() {
        assert!(matches!(
            finite_platt((f64::NAN, 0.0)),
            Err(ClassifierError::Diverged("SVM"))
        ));
        assert!(matches!(
            finite_platt((-1.0, f64::INFINITY)),
            Err(ClassifierError::Diverged("SVM"))
        ));
        assert_eq!(finite_platt((-1.5, 0.2)).unwrap(), (-1.5, 0.2));
    }
}
