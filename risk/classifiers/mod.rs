//! The fixed roster of classifier families and the capabilities each declares.
//!
//! Every family implements [`ProbabilisticClassifier`]. The optional
//! [`DecisionMargin`] and [`FeatureImportance`] capabilities are declared per
//! family in [`Classifier::as_decision_margin`] and
//! [`Classifier::as_feature_importance`]; nothing is discovered at runtime.

pub mod boosting;
pub mod ensemble;
pub mod forest;
pub mod logistic;
pub mod mlp;
pub mod svm;
pub mod tree;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use boosting::{GradientBoosting, GradientBoostingParams};
pub use ensemble::{FinalModel, NamedClassifier, SoftVotingEnsemble};
pub use forest::{RandomForest, RandomForestParams};
pub use logistic::{LogisticParams, LogisticRegression, Penalty};
pub use mlp::{Mlp, MlpParams};
pub use svm::{LinearSvm, SvmParams};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Cannot fit a classifier on an empty training matrix.")]
    EmptyInput,

    #[error("Training matrix has {rows} rows but {labels} labels were supplied.")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("Training matrix contains NaN or infinite values.")]
    NonFiniteInput,

    #[error("Training labels contain a single class; both classes are required.")]
    SingleClass,

    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("{0} produced non-finite parameters during fitting.")]
    Diverged(&'static str),
}

/// Checks the shape, finiteness and class balance every family relies on.
pub fn validate_training_input(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
) -> Result<(), ClassifierError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ClassifierError::EmptyInput);
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::LengthMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if !x.iter().chain(y.iter()).all(|v| v.is_finite()) {
        return Err(ClassifierError::NonFiniteInput);
    }
    let positives = y.iter().filter(|v| **v > 0.5).count();
    if positives == 0 || positives == y.len() {
        return Err(ClassifierError::SingleClass);
    }
    Ok(())
}

/// Logistic function evaluated without overflow for large `|z|`.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Base capability: a probability for the positive class.
pub trait ProbabilisticClassifier {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64;

    fn predict_probabilities(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.outer_iter()
            .map(|row| self.predict_probability(row))
            .collect()
    }
}

/// Signed distance-like score whose sign agrees with the predicted class.
pub trait DecisionMargin {
    fn decision_margin(&self, row: ArrayView1<f64>) -> f64;
}

/// Per-feature importances, non-negative and summing to one when non-zero.
pub trait FeatureImportance {
    fn feature_importances(&self) -> &[f64];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    RandomForest,
    GradientBoosting,
    LogisticRegression,
    #[serde(rename = "SVM")]
    Svm,
    #[serde(rename = "MLP")]
    Mlp,
}

impl ModelFamily {
    /// Training order; also the tie-break order when ranking candidates.
    pub const ROSTER: [ModelFamily; 5] = [
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosting,
        ModelFamily::LogisticRegression,
        ModelFamily::Svm,
        ModelFamily::Mlp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RandomForest => "RandomForest",
            Self::GradientBoosting => "GradientBoosting",
            Self::LogisticRegression => "LogisticRegression",
            Self::Svm => "SVM",
            Self::Mlp => "MLP",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One point of a family's hyperparameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "params")]
pub enum CandidateParams {
    RandomForest(RandomForestParams),
    GradientBoosting(GradientBoostingParams),
    LogisticRegression(LogisticParams),
    #[serde(rename = "SVM")]
    Svm(SvmParams),
    #[serde(rename = "MLP")]
    Mlp(MlpParams),
}

impl CandidateParams {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::Svm(_) => ModelFamily::Svm,
            Self::Mlp(_) => ModelFamily::Mlp,
        }
    }

    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: u64,
    ) -> Result<Classifier, ClassifierError> {
        Ok(match self {
            Self::RandomForest(p) => Classifier::RandomForest(RandomForest::fit(x, y, p, seed)?),
            Self::GradientBoosting(p) => {
                Classifier::GradientBoosting(GradientBoosting::fit(x, y, p, seed)?)
            }
            Self::LogisticRegression(p) => {
                Classifier::LogisticRegression(LogisticRegression::fit(x, y, p)?)
            }
            Self::Svm(p) => Classifier::Svm(LinearSvm::fit(x, y, p, seed)?),
            Self::Mlp(p) => Classifier::Mlp(Mlp::fit(x, y, p, seed)?),
        })
    }
}

impl fmt::Display for CandidateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RandomForest(p) => fmt::Display::fmt(p, f),
            Self::GradientBoosting(p) => fmt::Display::fmt(p, f),
            Self::LogisticRegression(p) => fmt::Display::fmt(p, f),
            Self::Svm(p) => fmt::Display::fmt(p, f),
            Self::Mlp(p) => fmt::Display::fmt(p, f),
        }
    }
}

/// A fitted model of any roster family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model")]
pub enum Classifier {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
    #[serde(rename = "SVM")]
    Svm(LinearSvm),
    #[serde(rename = "MLP")]
    Mlp(Mlp),
}

impl Classifier {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::Svm(_) => ModelFamily::Svm,
            Self::Mlp(_) => ModelFamily::Mlp,
        }
    }

    pub fn as_decision_margin(&self) -> Option<&dyn DecisionMargin> {
        match self {
            Self::GradientBoosting(m) => Some(m),
            Self::LogisticRegression(m) => Some(m),
            Self::Svm(m) => Some(m),
            Self::RandomForest(_) | Self::Mlp(_) => None,
        }
    }

    pub fn as_feature_importance(&self) -> Option<&dyn FeatureImportance> {
        match self {
            Self::RandomForest(m) => Some(m),
            Self::GradientBoosting(m) => Some(m),
            Self::LogisticRegression(_) | Self::Svm(_) | Self::Mlp(_) => None,
        }
    }
}

impl ProbabilisticClassifier for Classifier {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Self::RandomForest(m) => m.predict_probability(row),
            Self::GradientBoosting(m) => m.predict_probability(row),
            Self::LogisticRegression(m) => m.predict_probability(row),
            Self::Svm(m) => m.predict_probability(row),
            Self::Mlp(m) => m.predict_probability(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn validation_rejects_degenerate_input() {
        let x = array![[1.0], [2.0]];
        assert_eq!(
            validate_training_input(x.view(), array![1.0, 1.0].view()),
            Err(ClassifierError::SingleClass)
        );
        assert_eq!(
            validate_training_input(x.view(), array![1.0].view()),
            Err(ClassifierError::LengthMismatch { rows: 2, labels: 1 })
        );
        let bad = array![[f64::NAN], [2.0]];
        assert_eq!(
            validate_training_input(bad.view(), array![0.0, 1.0].view()),
            Err(ClassifierError::NonFiniteInput)
        );
    }

    #[test]
    fn capabilities_are_declared_per_family() {
        let lr = Classifier::LogisticRegression(LogisticRegression::from_parts(array![1.0], 0.0));
        assert!(lr.as_decision_margin().is_some());
        assert!(lr.as_feature_importance().is_none());
        assert_eq!(lr.family().name(), "LogisticRegression");
    }
}
