use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The chronic conditions this crate knows how to model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disease {
    Diabetes,
    HeartDisease,
    KidneyDisease,
    Stroke,
    Hypertension,
    Copd,
}

impl Disease {
    pub const ALL: [Disease; 6] = [
        Disease::Diabetes,
        Disease::HeartDisease,
        Disease::KidneyDisease,
        Disease::Stroke,
        Disease::Hypertension,
        Disease::Copd,
    ];

    /// Stable snake_case identifier, used in file names and config tables.
    pub fn id(self) -> &'static str {
        match self {
            Self::Diabetes => "diabetes",
            Self::HeartDisease => "heart_disease",
            Self::KidneyDisease => "kidney_disease",
            Self::Stroke => "stroke",
            Self::Hypertension => "hypertension",
            Self::Copd => "copd",
        }
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown disease '{0}'. Expected one of: diabetes, heart_disease, kidney_disease, stroke, hypertension, copd.")]
pub struct UnknownDisease(pub String);

impl FromStr for Disease {
    type Err = UnknownDisease;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Disease::ALL
            .into_iter()
            .find(|d| d.id() == normalized)
            .ok_or_else(|| UnknownDisease(s.to_string()))
    }
}

/// A single raw feature value as supplied by an upstream extractor.
///
/// Deserializes from JSON numbers, strings and `null` respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
    Missing,
}

impl FeatureValue {
    /// True for `Missing` and for non-finite numerics.
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Numeric(v) => !v.is_finite(),
            Self::Categorical(_) => false,
            Self::Missing => true,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Categorical(value.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        Self::Categorical(value)
    }
}

/// One patient's features, keyed by feature name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord {
    values: HashMap<String, FeatureValue>,
}

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FeatureValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Returns the value for `name` unless it is absent in any of its forms.
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name).filter(|v| !v.is_absent())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, FeatureValue)> for PatientRecord {
    fn from_iter<I: IntoIterator<Item = (String, FeatureValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Discrete risk bucket derived from a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Very High Risk")]
    VeryHigh,
}

impl RiskCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low Risk",
            Self::Moderate => "Moderate Risk",
            Self::High => "High Risk",
            Self::VeryHigh => "Very High Risk",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lower bounds of the moderate, high and very-high buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            moderate: 0.6,
            high: 0.8,
        }
    }
}

impl RiskThresholds {
    pub const fn new(low: f64, moderate: f64, high: f64) -> Self {
        Self {
            low,
            moderate,
            high,
        }
    }

    /// Buckets are lower-inclusive and upper-exclusive, checked in ascending order.
    pub fn categorize(&self, probability: f64) -> RiskCategory {
        if probability < self.low {
            RiskCategory::Low
        } else if probability < self.moderate {
            RiskCategory::Moderate
        } else if probability < self.high {
            RiskCategory::High
        } else {
            RiskCategory::VeryHigh
        }
    }

    pub fn is_ordered(&self) -> bool {
        [self.low, self.moderate, self.high]
            .iter()
            .all(|t| t.is_finite() && (0.0..=1.0).contains(t))
            && self.low <= self.moderate
            && self.moderate <= self.high
    }
}

/// The result of scoring one patient for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub disease: Disease,
    pub probability: f64,
    pub category: RiskCategory,
    pub confidence: f64,
}

impl RiskAssessment {
    pub fn percentage(&self) -> f64 {
        self.probability * 100.0
    }
}
