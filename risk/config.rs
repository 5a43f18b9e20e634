//! Pipeline settings loaded from TOML, with per-disease profile overrides.

use crate::profiles::{DiseaseProfile, HyperparameterGrids, TargetCandidate};
use crate::trainer::TrainingOptions;
use crate::types::{Disease, FeatureValue, RiskThresholds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MODEL_PREFIX: &str = "enhanced_chronic_disease_model";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Partial replacement of a built-in [`DiseaseProfile`]. Absent fields keep
/// the built-in value; `feature_defaults` entries are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiseaseOverrides {
    pub thresholds: Option<RiskThresholds>,
    pub grids: Option<HyperparameterGrids>,
    pub required_features: Option<Vec<String>>,
    pub optional_features: Option<Vec<String>>,
    pub feature_defaults: BTreeMap<String, FeatureValue>,
    pub target_candidates: Option<Vec<TargetCandidate>>,
    pub excluded_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub seed: u64,
    pub holdout_fraction: f64,
    pub cv_folds: usize,
    pub max_selected_features: usize,
    pub model_dir: PathBuf,
    pub model_prefix: String,
    /// Keyed by disease identifier, e.g. `[diseases.heart_disease]`.
    pub diseases: BTreeMap<String, DiseaseOverrides>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            holdout_fraction: 0.2,
            cv_folds: 5,
            max_selected_features: 10,
            model_dir: PathBuf::from("models"),
            model_prefix: DEFAULT_MODEL_PREFIX.to_string(),
            diseases: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "holdout_fraction must lie strictly between 0 and 1 (got {})",
                self.holdout_fraction
            )));
        }
        if self.cv_folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "cv_folds must be at least 2 (got {})",
                self.cv_folds
            )));
        }
        if self.max_selected_features == 0 {
            return Err(ConfigError::Invalid(
                "max_selected_features must be positive".to_string(),
            ));
        }
        if self.model_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("model_prefix must not be empty".to_string()));
        }
        for (key, overrides) in &self.diseases {
            let disease: Disease = key
                .parse()
                .map_err(|e: crate::types::UnknownDisease| ConfigError::Invalid(e.to_string()))?;
            if let Some(thresholds) = &overrides.thresholds {
                if !thresholds.is_ordered() {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds for {disease} must satisfy 0 <= low <= moderate <= high <= 1"
                    )));
                }
            }
            if let Some(grids) = &overrides.grids {
                let empty = grids.empty_families();
                if !empty.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "grids for {disease} leave these families without candidates: {empty:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The built-in profile for `disease` with this configuration's overrides applied.
    pub fn profile_for(&self, disease: Disease) -> DiseaseProfile {
        let mut profile = DiseaseProfile::builtin(disease);
        let overrides = self
            .diseases
            .iter()
            .filter(|(key, _)| key.parse::<Disease>().ok() == Some(disease))
            .map(|(_, o)| o);
        for o in overrides {
            if let Some(thresholds) = o.thresholds {
                profile.thresholds = thresholds;
            }
            if let Some(grids) = &o.grids {
                profile.grids = grids.clone();
            }
            if let Some(required) = &o.required_features {
                profile.required_features = required.clone();
            }
            if let Some(optional) = &o.optional_features {
                profile.optional_features = optional.clone();
            }
            if let Some(candidates) = &o.target_candidates {
                profile.target_candidates = candidates.clone();
            }
            if let Some(excluded) = &o.excluded_columns {
                profile.excluded_columns = excluded.clone();
            }
            profile
                .feature_defaults
                .extend(o.feature_defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        profile
    }

    pub fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            seed: self.seed,
            cv_folds: self.cv_folds,
            max_selected_features: self.max_selected_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.model_prefix, "enhanced_chronic_disease_model");
    }

    #[test]
    fn overrides_replace_thresholds_and_merge_defaults() {
        let text = r#"
            seed = 7

            [diseases.diabetes]
            thresholds = { low = 0.1, moderate = 0.2, high = 0.3 }

            [diseases.diabetes.feature_defaults]
            insulin = 80
            smoking_status = "never"

            [diseases.diabetes.grids.random_forest]
            n_estimators = [5]
            max_depth = [3]
            min_samples_split = [2]
        "#;
        let config = PipelineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.seed, 7);
        let profile = config.profile_for(Disease::Diabetes);
        assert_eq!(profile.thresholds, RiskThresholds::new(0.1, 0.2, 0.3));
        assert_eq!(
            profile.feature_defaults.get("insulin"),
            Some(&FeatureValue::Numeric(80.0))
        );
        assert_eq!(
            profile.feature_defaults.get("smoking_status"),
            Some(&FeatureValue::Categorical("never".to_string()))
        );
        assert_eq!(profile.grids.random_forest.n_estimators, vec![5]);
        // Families not named in the override keep their built-in grid.
        assert_eq!(profile.grids.logistic_regression.c, vec![0.1, 1.0, 10.0]);

        let untouched = config.profile_for(Disease::Stroke);
        assert_eq!(untouched, DiseaseProfile::builtin(Disease::Stroke));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("cv_folds = 1"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[diseases.gout]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str(
                "[diseases.copd]\nthresholds = { low = 0.9, moderate = 0.5, high = 0.7 }"
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("holdout_fraction = \"big\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
