//! Applies trained bundles to single patient records.

use crate::classifiers::{FinalModel, ProbabilisticClassifier};
use crate::preprocess::PreprocessError;
use crate::store::ModelRegistry;
use crate::trainer::TrainedModelBundle;
use crate::types::{Disease, PatientRecord, RiskAssessment};
use log::{debug, warn};
use ndarray::ArrayView1;
use std::collections::BTreeMap;
use thiserror::Error;

/// Confidence reported when the model offers no spread or margin to judge by.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("No trained model is available for {0}.")]
    ModelUnavailable(Disease),

    #[error("Could not prepare features: {0}")]
    Preprocess(#[from] PreprocessError),
}

/// Scores one record against one disease's bundle.
pub fn predict(
    record: &PatientRecord,
    bundle: &TrainedModelBundle,
) -> Result<RiskAssessment, ScoringError> {
    let model = bundle
        .final_model
        .as_ref()
        .ok_or(ScoringError::ModelUnavailable(bundle.disease))?;
    let features = bundle.artifact.transform(record)?;

    let probability = model.predict_probability(features.view());
    let probability = if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        warn!("{} model produced a non-finite probability", bundle.disease);
        0.0
    };
    let confidence = confidence(model, features.view());
    debug!(
        "{}: probability {probability:.4}, confidence {confidence:.4}",
        bundle.disease
    );

    Ok(RiskAssessment {
        disease: bundle.disease,
        probability,
        category: bundle.thresholds.categorize(probability),
        confidence,
    })
}

/// Agreement between ensemble members, or the decision margin of a single
/// model that has one. Always within `[0, 1]`.
pub fn confidence(model: &FinalModel, row: ArrayView1<f64>) -> f64 {
    let raw = match model {
        FinalModel::Ensemble(ensemble) => {
            let probabilities = ensemble.member_probabilities(row);
            let n = probabilities.len() as f64;
            let mean = probabilities.iter().sum::<f64>() / n;
            let variance = probabilities.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
            1.0 - (2.0 * variance.sqrt()).min(1.0)
        }
        FinalModel::Single(named) => match named.model.as_decision_margin() {
            Some(margin) => (margin.decision_margin(row).abs() / 2.0).min(1.0),
            None => DEFAULT_CONFIDENCE,
        },
    };
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        DEFAULT_CONFIDENCE
    }
}

/// Per-disease results of scoring one record against several bundles.
#[derive(Debug, Default)]
pub struct BatchPrediction {
    pub assessments: BTreeMap<Disease, RiskAssessment>,
    pub failures: BTreeMap<Disease, ScoringError>,
}

impl BatchPrediction {
    /// Assessments ordered from highest to lowest probability.
    pub fn ranked(&self) -> Vec<&RiskAssessment> {
        let mut ranked: Vec<&RiskAssessment> = self.assessments.values().collect();
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        ranked
    }
}

/// Scores `record` for each requested disease. A disease without a loaded
/// bundle, or whose scoring fails, is recorded in `failures` and does not
/// affect the others.
pub fn predict_batch(
    record: &PatientRecord,
    registry: &ModelRegistry,
    diseases: &[Disease],
) -> BatchPrediction {
    let mut batch = BatchPrediction::default();
    for &disease in diseases {
        let result = registry
            .get(disease)
            .ok_or(ScoringError::ModelUnavailable(disease))
            .and_then(|bundle| predict(record, bundle));
        match result {
            Ok(assessment) => {
                batch.assessments.insert(disease, assessment);
            }
            Err(e) => {
                warn!("Skipping {disease}: {e}");
                batch.failures.insert(disease, e);
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::{
        Classifier, LogisticRegression, NamedClassifier, RandomForest, RandomForestParams,
        SoftVotingEnsemble,
    };
    use ndarray::array;

    fn logistic(weight: f64, bias: f64) -> NamedClassifier {
        NamedClassifier::new(
            "LogisticRegression",
            Classifier::LogisticRegression(LogisticRegression::from_parts(array![weight], bias)),
        )
    }

    #[test]
    fn single_model_confidence_follows_the_margin() {
        let model = FinalModel::Single(logistic(1.0, 0.0));
        assert_eq!(confidence(&model, array![1.0].view()), 0.5);
        assert_eq!(confidence(&model, array![-1.0].view()), 0.5);
        assert_eq!(confidence(&model, array![6.0].view()), 1.0);
        assert_eq!(confidence(&model, array![0.0].view()), 0.0);
    }

    #[test]
    fn unanimous_ensemble_is_fully_confident() {
        let ensemble =
            SoftVotingEnsemble::new(vec![logistic(1.0, 0.0), logistic(1.0, 0.0)]).unwrap();
        let model = FinalModel::Ensemble(ensemble);
        assert_eq!(confidence(&model, array![0.7].view()), 1.0);
    }

    #[test]
    fn disagreeing_ensemble_loses_confidence() {
        let ensemble =
            SoftVotingEnsemble::new(vec![logistic(10.0, 0.0), logistic(-10.0, 0.0)]).unwrap();
        let model = FinalModel::Ensemble(ensemble);
        let c = confidence(&model, array![3.0].view());
        assert!(c < 0.01, "confidence {c}");
        assert!(c >= 0.0);
    }

    #[test]
    fn models_without_a_margin_use_the_default() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let params = RandomForestParams {
            n_estimators: 5,
            max_depth: Some(2),
            min_samples_split: 2,
        };
        let forest = RandomForest::fit(x.view(), y.view(), &params, 3).unwrap();
        let model =
            FinalModel::Single(NamedClassifier::new("RandomForest", Classifier::RandomForest(forest)));
        assert_eq!(confidence(&model, array![1.0].view()), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn missing_bundle_is_isolated_in_a_batch() {
        let registry = ModelRegistry::new();
        let batch = predict_batch(&PatientRecord::new(), &registry, &[Disease::Diabetes]);
        assert!(batch.assessments.is_empty());
        assert!(matches!(
            batch.failures.get(&Disease::Diabetes),
            Some(ScoringError::ModelUnavailable(Disease::Diabetes))
        ));
    }
}
