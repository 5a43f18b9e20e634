//! Built-in per-disease profiles: declared features, risk thresholds, label
//! resolution rules and the hyperparameter grids searched during training.

use crate::classifiers::{
    CandidateParams, GradientBoostingParams, LogisticParams, MlpParams, ModelFamily, Penalty,
    RandomForestParams, SvmParams,
};
use crate::types::{Disease, FeatureValue, RiskThresholds};
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How raw values of a label column become 0/1 targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum LabelRule {
    /// Numeric 0/1 kept as is, other numerics become `> 0`; text with exactly
    /// two classes is encoded in sorted order.
    Binary,
    PositiveAboveZero,
    AtLeast { threshold: f64 },
    /// Text values looked up case-insensitively; unmapped values become 0.
    Mapping { table: BTreeMap<String, u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCandidate {
    pub column: String,
    #[serde(flatten)]
    pub rule: LabelRule,
}

impl TargetCandidate {
    fn binary(column: &str) -> Self {
        Self {
            column: column.to_string(),
            rule: LabelRule::Binary,
        }
    }

    fn with_rule(column: &str, rule: LabelRule) -> Self {
        Self {
            column: column.to_string(),
            rule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestGrid {
    pub n_estimators: Vec<usize>,
    /// Zero stands for unbounded depth.
    pub max_depth: Vec<usize>,
    pub min_samples_split: Vec<usize>,
}

impl Default for RandomForestGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            max_depth: vec![10, 20, 0],
            min_samples_split: vec![2, 5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingGrid {
    pub n_estimators: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub max_depth: Vec<usize>,
}

impl Default for GradientBoostingGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            learning_rate: vec![0.1, 0.05],
            max_depth: vec![3, 5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticGrid {
    pub c: Vec<f64>,
    pub penalty: Vec<Penalty>,
    pub max_iterations: usize,
}

impl Default for LogisticGrid {
    fn default() -> Self {
        Self {
            c: vec![0.1, 1.0, 10.0],
            penalty: vec![Penalty::L1, Penalty::L2],
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmGrid {
    pub c: Vec<f64>,
    pub max_epochs: usize,
}

impl Default for SvmGrid {
    fn default() -> Self {
        Self {
            c: vec![1.0],
            max_epochs: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpGrid {
    pub hidden_units: Vec<usize>,
    pub alpha: Vec<f64>,
    pub max_epochs: usize,
}

impl Default for MlpGrid {
    fn default() -> Self {
        Self {
            hidden_units: vec![100],
            alpha: vec![1e-4],
            max_epochs: 200,
        }
    }
}

/// Candidate hyperparameters for every roster family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparameterGrids {
    pub random_forest: RandomForestGrid,
    pub gradient_boosting: GradientBoostingGrid,
    pub logistic_regression: LogisticGrid,
    pub svm: SvmGrid,
    pub mlp: MlpGrid,
}

impl HyperparameterGrids {
    /// Expands one family's grid in row-major order of its declared axes.
    pub fn candidates(&self, family: ModelFamily) -> Vec<CandidateParams> {
        match family {
            ModelFamily::RandomForest => {
                let g = &self.random_forest;
                iproduct!(&g.n_estimators, &g.max_depth, &g.min_samples_split)
                    .map(|(&n_estimators, &depth, &min_samples_split)| {
                        CandidateParams::RandomForest(RandomForestParams {
                            n_estimators,
                            max_depth: (depth > 0).then_some(depth),
                            min_samples_split,
                        })
                    })
                    .collect()
            }
            ModelFamily::GradientBoosting => {
                let g = &self.gradient_boosting;
                iproduct!(&g.n_estimators, &g.learning_rate, &g.max_depth)
                    .map(|(&n_estimators, &learning_rate, &max_depth)| {
                        CandidateParams::GradientBoosting(GradientBoostingParams {
                            n_estimators,
                            learning_rate,
                            max_depth,
                            min_samples_split: 2,
                        })
                    })
                    .collect()
            }
            ModelFamily::LogisticRegression => {
                let g = &self.logistic_regression;
                iproduct!(&g.c, &g.penalty)
                    .map(|(&c, &penalty)| {
                        CandidateParams::LogisticRegression(LogisticParams {
                            c,
                            penalty,
                            max_iterations: g.max_iterations,
                        })
                    })
                    .collect()
            }
            ModelFamily::Svm => self
                .svm
                .c
                .iter()
                .map(|&c| {
                    CandidateParams::Svm(SvmParams {
                        c,
                        max_epochs: self.svm.max_epochs,
                    })
                })
                .collect(),
            ModelFamily::Mlp => {
                let g = &self.mlp;
                iproduct!(&g.hidden_units, &g.alpha)
                    .map(|(&hidden_units, &alpha)| {
                        CandidateParams::Mlp(MlpParams {
                            hidden_units,
                            alpha,
                            max_epochs: g.max_epochs,
                        })
                    })
                    .collect()
            }
        }
    }

    /// Families whose grid expands to no points at all.
    pub fn empty_families(&self) -> Vec<ModelFamily> {
        ModelFamily::ROSTER
            .into_iter()
            .filter(|f| self.candidates(*f).is_empty())
            .collect()
    }
}

/// Everything the pipeline knows about one disease before seeing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseProfile {
    pub disease: Disease,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    /// Values substituted for features a scored record lacks, ahead of the
    /// frozen imputers. Training tables never see them.
    pub feature_defaults: BTreeMap<String, FeatureValue>,
    pub thresholds: RiskThresholds,
    pub grids: HyperparameterGrids,
    /// Label columns in order of preference.
    pub target_candidates: Vec<TargetCandidate>,
    /// Identifier columns never used as features.
    pub excluded_columns: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl DiseaseProfile {
    pub fn builtin(disease: Disease) -> Self {
        let (required, optional): (&[&str], &[&str]) = match disease {
            Disease::Diabetes => (
                &["glucose", "bmi", "age"],
                &[
                    "blood_pressure",
                    "insulin",
                    "pregnancies",
                    "skin_thickness",
                    "diabetes_pedigree",
                ],
            ),
            Disease::HeartDisease => (
                &["age", "cholesterol", "blood_pressure"],
                &[
                    "chest_pain_type",
                    "max_heart_rate",
                    "exercise_angina",
                    "st_depression",
                ],
            ),
            Disease::KidneyDisease => (
                &["age", "blood_pressure", "creatinine"],
                &["hemoglobin", "albumin", "sugar", "red_blood_cells"],
            ),
            Disease::Stroke => (
                &["age", "hypertension", "heart_disease"],
                &["avg_glucose_level", "bmi", "smoking_status", "work_type"],
            ),
            Disease::Hypertension => (
                &["age", "sex", "cp", "trestbps", "chol"],
                &["restecg", "thalach", "exang", "oldpeak", "slope", "ca", "thal"],
            ),
            Disease::Copd => (&[], &[]),
        };

        let thresholds = match disease {
            Disease::Diabetes => RiskThresholds::new(0.25, 0.55, 0.75),
            Disease::HeartDisease => RiskThresholds::new(0.30, 0.60, 0.80),
            Disease::KidneyDisease => RiskThresholds::new(0.20, 0.50, 0.70),
            Disease::Stroke => RiskThresholds::new(0.15, 0.45, 0.70),
            Disease::Hypertension => RiskThresholds::new(0.35, 0.65, 0.85),
            Disease::Copd => RiskThresholds::new(0.25, 0.55, 0.75),
        };

        let (target_candidates, excluded) = match disease {
            Disease::Diabetes => (
                ["outcome", "diabetes", "target", "class", "diabetic"]
                    .map(TargetCandidate::binary)
                    .to_vec(),
                vec![],
            ),
            Disease::HeartDisease => (
                ["target", "heart_disease", "num", "diagnosis", "heartdisease"]
                    .map(|c| TargetCandidate::with_rule(c, LabelRule::PositiveAboveZero))
                    .to_vec(),
                vec![],
            ),
            Disease::KidneyDisease => {
                let table = BTreeMap::from([("ckd".to_string(), 1), ("notckd".to_string(), 0)]);
                (
                    ["classification", "class", "ckd", "kidney_disease", "target"]
                        .map(|c| {
                            TargetCandidate::with_rule(
                                c,
                                LabelRule::Mapping {
                                    table: table.clone(),
                                },
                            )
                        })
                        .to_vec(),
                    names(&["id"]),
                )
            }
            Disease::Stroke => (
                ["stroke", "target", "outcome"]
                    .map(TargetCandidate::binary)
                    .to_vec(),
                names(&["id"]),
            ),
            Disease::Hypertension => (
                ["hypertension", "target", "high_bp", "bp_category"]
                    .map(TargetCandidate::binary)
                    .to_vec(),
                vec![],
            ),
            Disease::Copd => {
                let severity = BTreeMap::from([
                    ("mild".to_string(), 0),
                    ("moderate".to_string(), 0),
                    ("severe".to_string(), 1),
                    ("very severe".to_string(), 1),
                ]);
                (
                    vec![
                        TargetCandidate::with_rule("copd", LabelRule::AtLeast { threshold: 3.0 }),
                        TargetCandidate::with_rule(
                            "copdseverity",
                            LabelRule::Mapping { table: severity },
                        ),
                        TargetCandidate::binary("target"),
                        TargetCandidate::binary("diagnosis"),
                        TargetCandidate::binary("outcome"),
                    ],
                    names(&["unnamed_0", "id"]),
                )
            }
        };

        Self {
            disease,
            required_features: names(required),
            optional_features: names(optional),
            feature_defaults: BTreeMap::new(),
            thresholds,
            grids: HyperparameterGrids::default(),
            target_candidates,
            excluded_columns: excluded,
        }
    }

    /// Declared features, required or optional, that are not among `columns`.
    pub fn missing_from<'c>(&self, columns: impl IntoIterator<Item = &'c str>) -> Vec<&str> {
        let present: Vec<&str> = columns.into_iter().collect();
        self.required_features
            .iter()
            .chain(&self.optional_features)
            .map(String::as_str)
            .filter(|name| !present.contains(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_declared_features_cover_required_and_optional() {
        let profile = DiseaseProfile::builtin(Disease::Stroke);
        let missing = profile.missing_from(["age", "bmi", "work_type", "patient_id"]);
        assert_eq!(
            missing,
            vec!["hypertension", "heart_disease", "avg_glucose_level", "smoking_status"]
        );
    }

    #[test]
    fn builtin_grids_have_the_documented_sizes() {
        let grids = HyperparameterGrids::default();
        let sizes: Vec<usize> = ModelFamily::ROSTER
            .iter()
            .map(|f| grids.candidates(*f).len())
            .collect();
        assert_eq!(sizes, vec![12, 8, 6, 1, 1]);
        assert!(grids.empty_families().is_empty());
    }

    #[test]
    fn zero_depth_means_unbounded() {
        let grids = HyperparameterGrids::default();
        let unbounded = grids
            .candidates(ModelFamily::RandomForest)
            .into_iter()
            .filter(|c| matches!(c, CandidateParams::RandomForest(p) if p.max_depth.is_none()))
            .count();
        assert_eq!(unbounded, 4);
    }

    #[test]
    fn thresholds_follow_the_disease() {
        let stroke = DiseaseProfile::builtin(Disease::Stroke);
        assert_eq!(stroke.thresholds, RiskThresholds::new(0.15, 0.45, 0.70));
        assert_eq!(stroke.required_features, vec!["age", "hypertension", "heart_disease"]);
        for disease in Disease::ALL {
            let profile = DiseaseProfile::builtin(disease);
            assert!(profile.thresholds.is_ordered());
            assert!(!profile.target_candidates.is_empty());
        }
    }

    #[test]
    fn label_rules_deserialize_from_toml() {
        let candidate: TargetCandidate =
            toml::from_str("column = \"copd\"\nrule = \"at_least\"\nthreshold = 3.0\n").unwrap();
        assert_eq!(candidate.rule, LabelRule::AtLeast { threshold: 3.0 });
    }
}
