use prognos::classifiers::ModelFamily;
use prognos::{ConfigError, Disease, ModelStore, PipelineConfig, RiskThresholds};
use std::path::PathBuf;

const CONFIG: &str = r#"
seed = 3
cv_folds = 4
model_dir = "trained"
model_prefix = "clinic"

[diseases.diabetes]
thresholds = { low = 0.25, moderate = 0.5, high = 0.9 }

[diseases.diabetes.grids.random_forest]
n_estimators = [10]
max_depth = [3]
min_samples_split = [2]

[diseases.diabetes.grids.gradient_boosting]
n_estimators = [10]
learning_rate = [0.1]
max_depth = [2]

[diseases.diabetes.grids.logistic_regression]
c = [1.0]
penalty = ["l1"]

[diseases."heart disease"]
required_features = ["age"]
"#;

#[test]
fn file_overrides_reach_profiles_and_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prognos.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = PipelineConfig::from_toml_file(&path).unwrap();
    let options = config.training_options();
    assert_eq!(options.seed, 3);
    assert_eq!(options.cv_folds, 4);

    let diabetes = config.profile_for(Disease::Diabetes);
    assert_eq!(diabetes.thresholds, RiskThresholds::new(0.25, 0.5, 0.9));
    assert_eq!(diabetes.grids.candidates(ModelFamily::RandomForest).len(), 1);
    assert_eq!(diabetes.grids.candidates(ModelFamily::LogisticRegression).len(), 1);
    // Families without an override keep the built-in grid.
    assert_eq!(diabetes.grids.candidates(ModelFamily::Svm).len(), 1);

    let heart = config.profile_for(Disease::HeartDisease);
    assert_eq!(heart.required_features, vec!["age"]);
    assert_eq!(heart.thresholds, RiskThresholds::new(0.30, 0.60, 0.80));

    let store = ModelStore::from_config(&config);
    assert_eq!(
        store.path_for(Disease::Stroke),
        PathBuf::from("trained/clinic_stroke.json.gz")
    );
}

#[test]
fn invalid_documents_are_rejected() {
    assert!(matches!(
        PipelineConfig::from_toml_str("[diseases.gout]\n"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        PipelineConfig::from_toml_str(
            "[diseases.stroke]\nthresholds = { low = 0.7, moderate = 0.5, high = 0.9 }\n"
        ),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        PipelineConfig::from_toml_str("holdout_fraction = 1.5\n"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        PipelineConfig::from_toml_str("seed = \"many\"\n"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        PipelineConfig::from_toml_file(std::path::Path::new("/nonexistent/prognos.toml")),
        Err(ConfigError::Io { .. })
    ));
}
