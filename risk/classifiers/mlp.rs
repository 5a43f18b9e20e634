use super::{ClassifierError, ProbabilisticClassifier, sigmoid, validate_training_input};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

const LEARNING_RATE: f64 = 1e-3;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
const MAX_BATCH_SIZE: usize = 200;
const LOSS_TOLERANCE: f64 = 1e-4;
const EPOCHS_WITHOUT_IMPROVEMENT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden_units: usize,
    /// L2 penalty on the weights.
    pub alpha: f64,
    pub max_epochs: usize,
}

impl fmt::Display for MlpParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hidden_units={}, alpha={}", self.hidden_units, self.alpha)
    }
}

/// One ReLU hidden layer and a sigmoid output, trained with Adam on log-loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    hidden_weights: Array2<f64>,
    hidden_bias: Array1<f64>,
    output_weights: Array1<f64>,
    output_bias: f64,
}

/// First and second moment estimates for one parameter tensor.
struct Moments<D: ndarray::Dimension> {
    first: ndarray::Array<f64, D>,
    second: ndarray::Array<f64, D>,
}

impl<D: ndarray::Dimension> Moments<D> {
    fn zeros_like(param: &ndarray::Array<f64, D>) -> Self {
        Self {
            first: ndarray::Array::zeros(param.raw_dim()),
            second: ndarray::Array::zeros(param.raw_dim()),
        }
    }

    fn step(
        &mut self,
        param: &mut ndarray::Array<f64, D>,
        grad: &ndarray::Array<f64, D>,
        step_size: f64,
    ) {
        self.first.zip_mut_with(grad, |m, g| *m = BETA1 * *m + (1.0 - BETA1) * g);
        self.second
            .zip_mut_with(grad, |v, g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);
        ndarray::Zip::from(param)
            .and(&self.first)
            .and(&self.second)
            .for_each(|p, m, v| *p -= step_size * m / (v.sqrt() + ADAM_EPSILON));
    }
}

impl Mlp {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &MlpParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        validate_training_input(x, y)?;
        if params.hidden_units == 0 {
            return Err(ClassifierError::InvalidParameter(
                "MLP needs at least one hidden unit".to_string(),
            ));
        }

        let n = x.nrows();
        let p = x.ncols();
        let h = params.hidden_units;
        let mut rng = StdRng::seed_from_u64(seed);

        let hidden_bound = (6.0 / (p + h) as f64).sqrt();
        let output_bound = (6.0 / (h + 1) as f64).sqrt();
        let hidden_init = Uniform::new(-hidden_bound, hidden_bound);
        let output_init = Uniform::new(-output_bound, output_bound);

        let mut model = Self {
            hidden_weights: Array2::from_shape_fn((p, h), |_| hidden_init.sample(&mut rng)),
            hidden_bias: Array1::from_shape_fn(h, |_| hidden_init.sample(&mut rng)),
            output_weights: Array1::from_shape_fn(h, |_| output_init.sample(&mut rng)),
            output_bias: output_init.sample(&mut rng),
        };

        let mut m_hidden_w = Moments::zeros_like(&model.hidden_weights);
        let mut m_hidden_b = Moments::zeros_like(&model.hidden_bias);
        let mut m_output_w = Moments::zeros_like(&model.output_weights);
        let mut output_bias = Array1::from_elem(1, model.output_bias);
        let mut m_output_b = Moments::zeros_like(&output_bias);

        let batch_size = n.min(MAX_BATCH_SIZE);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;
        let mut t = 0i32;

        for epoch in 0..params.max_epochs.max(1) {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(batch_size) {
                t += 1;
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let bs = batch.len() as f64;

                let pre = xb.dot(&model.hidden_weights) + &model.hidden_bias;
                let hidden = pre.mapv(|v| v.max(0.0));
                let logits = hidden.dot(&model.output_weights) + output_bias[0];
                let probs = logits.mapv(sigmoid);

                epoch_loss += probs
                    .iter()
                    .zip(yb.iter())
                    .map(|(prob, target)| {
                        let prob = prob.clamp(1e-12, 1.0 - 1e-12);
                        -(target * prob.ln() + (1.0 - target) * (1.0 - prob).ln())
                    })
                    .sum::<f64>();

                let delta_out = (&probs - &yb) / bs;
                let grad_output_w =
                    hidden.t().dot(&delta_out) + &model.output_weights * (params.alpha / bs);
                let grad_output_b = Array1::from_elem(1, delta_out.sum());

                let mut delta_hidden = delta_out
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&model.output_weights.view().insert_axis(Axis(0)));
                delta_hidden.zip_mut_with(&pre, |d, z| {
                    if *z <= 0.0 {
                        *d = 0.0;
                    }
                });
                let grad_hidden_w =
                    xb.t().dot(&delta_hidden) + &model.hidden_weights * (params.alpha / bs);
                let grad_hidden_b = delta_hidden.sum_axis(Axis(0));

                let step_size = LEARNING_RATE * (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));
                m_hidden_w.step(&mut model.hidden_weights, &grad_hidden_w, step_size);
                m_hidden_b.step(&mut model.hidden_bias, &grad_hidden_b, step_size);
                m_output_w.step(&mut model.output_weights, &grad_output_w, step_size);
                m_output_b.step(&mut output_bias, &grad_output_b, step_size);
            }

            let weight_norm = model.hidden_weights.iter().map(|w| w * w).sum::<f64>()
                + model.output_weights.iter().map(|w| w * w).sum::<f64>();
            let epoch_loss = (epoch_loss + 0.5 * params.alpha * weight_norm) / n as f64;
            if !epoch_loss.is_finite() {
                return Err(ClassifierError::Diverged("MLP"));
            }
            if epoch_loss > best_loss - LOSS_TOLERANCE {
                stale_epochs += 1;
            } else {
                stale_epochs = 0;
            }
            best_loss = best_loss.min(epoch_loss);
            if stale_epochs > EPOCHS_WITHOUT_IMPROVEMENT {
                debug!("MLP training stopped after {} epochs", epoch + 1);
                break;
            }
        }

        model.output_bias = output_bias[0];
        if !model.parameters_are_finite() {
            return Err(ClassifierError::Diverged("MLP"));
        }
        Ok(model)
    }

    fn parameters_are_finite(&self) -> bool {
        self.hidden_weights.iter().all(|v| v.is_finite())
            && self.hidden_bias.iter().all(|v| v.is_finite())
            && self.output_weights.iter().all(|v| v.is_finite())
            && self.output_bias.is_finite()
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden_bias.len()
    }
}

impl ProbabilisticClassifier for Mlp {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        let hidden = (row.dot(&self.hidden_weights) + &self.hidden_bias).mapv(|v| v.max(0.0));
        sigmoid(hidden.dot(&self.output_weights) + self.output_bias)
    }
}
