use super::{Classifier, ProbabilisticClassifier};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// A fitted classifier together with the candidate name it was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedClassifier {
    pub name: String,
    pub model: Classifier,
}

impl NamedClassifier {
    pub fn new(name: impl Into<String>, model: Classifier) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }
}

/// Equal-weight average of member probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftVotingEnsemble {
    members: Vec<NamedClassifier>,
}

impl SoftVotingEnsemble {
    /// Returns `None` for an empty member list, which has no defined vote.
    pub fn new(members: Vec<NamedClassifier>) -> Option<Self> {
        if members.is_empty() {
            None
        } else {
            Some(Self { members })
        }
    }

    pub fn members(&self) -> &[NamedClassifier] {
        &self.members
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    pub fn member_probabilities(&self, row: ArrayView1<f64>) -> Vec<f64> {
        self.members
            .iter()
            .map(|m| m.model.predict_probability(row))
            .collect()
    }
}

impl ProbabilisticClassifier for SoftVotingEnsemble {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        let probabilities = self.member_probabilities(row);
        probabilities.iter().sum::<f64>() / probabilities.len() as f64
    }
}

/// The model a bundle scores with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalModel {
    Single(NamedClassifier),
    Ensemble(SoftVotingEnsemble),
}

impl FinalModel {
    /// `"ensemble"` or the winning candidate's name.
    pub fn model_type(&self) -> &str {
        match self {
            Self::Single(named) => &named.name,
            Self::Ensemble(_) => "ensemble",
        }
    }

    /// Importances of a single model that declares them, or the mean over the
    /// ensemble members that do. `None` when no member declares them.
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            Self::Single(named) => named
                .model
                .as_feature_importance()
                .map(|m| m.feature_importances().to_vec()),
            Self::Ensemble(ensemble) => {
                let declared: Vec<&[f64]> = ensemble
                    .members
                    .iter()
                    .filter_map(|m| m.model.as_feature_importance())
                    .map(|m| m.feature_importances())
                    .collect();
                let first = declared.first()?;
                let mut mean = vec![0.0; first.len()];
                for importances in &declared {
                    for (acc, v) in mean.iter_mut().zip(importances.iter()) {
                        *acc += v;
                    }
                }
                let count = declared.len() as f64;
                mean.iter_mut().for_each(|v| *v /= count);
                Some(mean)
            }
        }
    }
}

impl ProbabilisticClassifier for FinalModel {
    fn predict_probability(&self, row: ArrayView1<f64>) -> f64 {
        let p = match self {
            Self::Single(named) => named.model.predict_probability(row),
            Self::Ensemble(ensemble) => ensemble.predict_probability(row),
        };
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::LogisticRegression;
    use ndarray::array;

    fn lr(weight: f64, name: &str) -> NamedClassifier {
        NamedClassifier::new(
            name,
            Classifier::LogisticRegression(LogisticRegression::from_parts(array![weight], 0.0)),
        )
    }

    #[test]
    fn ensemble_averages_member_probabilities() {
        let ensemble = SoftVotingEnsemble::new(vec![lr(1.0, "a"), lr(-1.0, "b")]).unwrap();
        let row = array![2.0];
        let members = ensemble.member_probabilities(row.view());
        assert_eq!(members.len(), 2);
        assert!((ensemble.predict_probability(row.view()) - 0.5).abs() < 1e-12);
        assert_eq!(ensemble.member_names(), vec!["a", "b"]);
    }

    #[test]
    fn empty_ensemble_is_refused() {
        assert!(SoftVotingEnsemble::new(Vec::new()).is_none());
    }

    #[test]
    fn linear_members_have_no_importances() {
        let model = FinalModel::Ensemble(SoftVotingEnsemble::new(vec![lr(1.0, "a")]).unwrap());
        assert_eq!(model.model_type(), "ensemble");
        assert!(model.feature_importances().is_none());
    }
}
