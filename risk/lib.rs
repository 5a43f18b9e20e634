//! Chronic-disease risk estimation: per-disease preprocessing, candidate model
//! search with a soft-voting ensemble policy, self-contained model bundles and
//! threshold-based risk scoring.

pub mod classifiers;
pub mod config;
pub mod data;
pub mod metrics;
pub mod preprocess;
pub mod profiles;
pub mod progress;
pub mod scorer;
pub mod search;
pub mod store;
pub mod trainer;
pub mod types;

pub use config::{ConfigError, PipelineConfig};
pub use data::{DataError, FeatureFrame, LabeledDataset};
pub use preprocess::{PreprocessError, PreprocessingArtifact};
pub use profiles::DiseaseProfile;
pub use scorer::{BatchPrediction, ScoringError};
pub use store::{ModelRegistry, ModelStore, StoreError};
pub use trainer::{ModelTrainer, TrainedModelBundle, TrainingError};
pub use types::{Disease, FeatureValue, PatientRecord, RiskAssessment, RiskCategory, RiskThresholds};
