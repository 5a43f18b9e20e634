use prognos::classifiers::Penalty;
use prognos::preprocess::PreprocessError;
use prognos::profiles::{
    GradientBoostingGrid, HyperparameterGrids, LogisticGrid, MlpGrid, RandomForestGrid, SvmGrid,
};
use prognos::scorer::{ScoringError, predict, predict_batch};
use prognos::trainer::TrainingOptions;
use prognos::{
    Disease, DiseaseProfile, LabeledDataset, ModelRegistry, ModelStore, ModelTrainer,
    PatientRecord, StoreError, TrainedModelBundle,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::fmt::Write;

fn small_grids() -> HyperparameterGrids {
    HyperparameterGrids {
        random_forest: RandomForestGrid {
            n_estimators: vec![10],
            max_depth: vec![4, 0],
            min_samples_split: vec![2],
        },
        gradient_boosting: GradientBoostingGrid {
            n_estimators: vec![20],
            learning_rate: vec![0.1],
            max_depth: vec![2],
        },
        logistic_regression: LogisticGrid {
            c: vec![0.1, 1.0],
            penalty: vec![Penalty::L2],
            max_iterations: 200,
        },
        svm: SvmGrid {
            c: vec![1.0],
            max_epochs: 100,
        },
        mlp: MlpGrid {
            hidden_units: vec![8],
            alpha: vec![1e-4],
            max_epochs: 50,
        },
    }
}

/// Diabetes-shaped table where glucose carries the signal and the rest is
/// noise. Every seventeenth glucose cell is blank.
fn diabetes_csv(n: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut out = String::from("Glucose,BMI,Age,Smoking Status,Outcome\n");
    for i in 0..n {
        let positive = i % 2 == 1;
        let glucose = if positive { 160.0 } else { 100.0 } + 12.0 * noise.sample(&mut rng);
        let bmi = 28.0 + 4.0 * noise.sample(&mut rng);
        let age = 50.0 + 10.0 * noise.sample(&mut rng);
        let smoking = ["never", "former", "current"][i % 3];
        let glucose_cell = if i % 17 == 0 {
            String::new()
        } else {
            format!("{glucose:.1}")
        };
        writeln!(
            out,
            "{glucose_cell},{bmi:.1},{age:.0},{smoking},{}",
            u8::from(positive)
        )
        .unwrap();
    }
    out
}

fn diabetes_profile() -> DiseaseProfile {
    let mut profile = DiseaseProfile::builtin(Disease::Diabetes);
    profile.grids = small_grids();
    profile
}

fn train_diabetes(seed: u64) -> TrainedModelBundle {
    let profile = diabetes_profile();
    let dataset =
        LabeledDataset::from_csv_reader(diabetes_csv(120, 5).as_bytes(), &profile).unwrap();
    let (training, holdout) = dataset.stratified_split(0.2, seed).unwrap();
    let trainer = ModelTrainer::new(TrainingOptions {
        seed,
        cv_folds: 3,
        max_selected_features: 10,
    });
    trainer.train(&training, &holdout, &profile).unwrap()
}

fn patient(glucose: f64, smoking: &str) -> PatientRecord {
    PatientRecord::new()
        .with("glucose", glucose)
        .with("bmi", 27.0)
        .with("age", 48.0)
        .with("smoking_status", smoking)
}

#[test]
fn trained_bundle_survives_a_store_round_trip() {
    let bundle = train_diabetes(42);
    assert_eq!(bundle.disease, Disease::Diabetes);
    assert!(bundle.final_model.is_some());
    assert!(bundle.metadata.auc_score > 0.8, "auc {}", bundle.metadata.auc_score);
    assert_eq!(bundle.metadata.holdout_samples, 24);
    assert_eq!(bundle.metadata.training_samples, 96);

    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path(), "enhanced_chronic_disease_model");
    let path = store.save(&bundle).unwrap();
    assert!(path.ends_with("enhanced_chronic_disease_model_diabetes.json.gz"));

    let loaded = store.load(Disease::Diabetes).unwrap();
    assert_eq!(loaded, bundle);

    for record in [patient(95.0, "never"), patient(170.0, "current"), patient(130.0, "former")] {
        assert_eq!(
            predict(&record, &bundle).unwrap(),
            predict(&record, &loaded).unwrap()
        );
    }
}

#[test]
fn assessments_rank_by_the_informative_feature() {
    let bundle = train_diabetes(42);
    let low = predict(&patient(90.0, "never"), &bundle).unwrap();
    let high = predict(&patient(175.0, "never"), &bundle).unwrap();
    assert!(high.probability > low.probability);
    for assessment in [&low, &high] {
        assert!((0.0..=1.0).contains(&assessment.probability));
        assert!((0.0..=1.0).contains(&assessment.confidence));
        assert_eq!(
            assessment.category,
            bundle.thresholds.categorize(assessment.probability)
        );
    }
}

#[test]
fn unseen_categories_and_missing_optionals_still_score() {
    let bundle = train_diabetes(42);
    let unseen = patient(120.0, "occasionally");
    assert!(predict(&unseen, &bundle).is_ok());

    let sparse = PatientRecord::new().with("glucose", 150.0);
    assert!(predict(&sparse, &bundle).is_ok());
}

#[test]
fn record_without_required_features_is_rejected() {
    let bundle = train_diabetes(42);
    let record = PatientRecord::new().with("smoking_status", "never");
    assert!(matches!(
        predict(&record, &bundle),
        Err(ScoringError::Preprocess(PreprocessError::SchemaMismatch { .. }))
    ));
}

#[test]
fn training_is_deterministic_for_a_fixed_seed() {
    let first = train_diabetes(11);
    let second = train_diabetes(11);
    assert_eq!(first.metadata.model_type, second.metadata.model_type);
    assert_eq!(first.metadata.leaderboard, second.metadata.leaderboard);
    assert_eq!(first.artifact, second.artifact);
    assert_eq!(first.final_model, second.final_model);
}

#[test]
fn batch_scoring_isolates_a_missing_disease() {
    let bundle = train_diabetes(42);
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path(), "m");
    let trained = [
        Disease::Diabetes,
        Disease::HeartDisease,
        Disease::KidneyDisease,
        Disease::Stroke,
    ];
    for disease in trained {
        let mut copy = bundle.clone();
        copy.disease = disease;
        store.save(&copy).unwrap();
    }

    let requested = [
        Disease::Diabetes,
        Disease::HeartDisease,
        Disease::KidneyDisease,
        Disease::Stroke,
        Disease::Hypertension,
    ];
    let (registry, load_failures) = store.load_registry(&requested);
    assert_eq!(registry.len(), 4);
    assert!(matches!(
        load_failures.get(&Disease::Hypertension),
        Some(StoreError::ModelNotFound { .. })
    ));

    let batch = predict_batch(&patient(140.0, "never"), &registry, &requested);
    assert_eq!(batch.assessments.len(), 4);
    assert_eq!(batch.failures.len(), 1);
    assert!(matches!(
        batch.failures.get(&Disease::Hypertension),
        Some(ScoringError::ModelUnavailable(Disease::Hypertension))
    ));
    let probabilities: Vec<f64> = batch.assessments.values().map(|a| a.probability).collect();
    assert!(probabilities.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn bundle_saved_under_another_disease_name_is_corrupt() {
    let bundle = train_diabetes(42);
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path(), "m");
    let path = store.save(&bundle).unwrap();
    let stroke_path = store.path_for(Disease::Stroke);
    std::fs::rename(&path, &stroke_path).unwrap();
    assert!(matches!(
        ModelStore::load_path(&stroke_path, Disease::Stroke),
        Err(StoreError::ModelCorrupt { .. })
    ));
}

#[test]
fn bundle_without_a_model_is_unavailable() {
    let mut bundle = train_diabetes(42);
    bundle.final_model = None;
    let mut registry = ModelRegistry::new();
    registry.insert(bundle);
    let batch = predict_batch(&patient(120.0, "never"), &registry, &[Disease::Diabetes]);
    assert!(matches!(
        batch.failures.get(&Disease::Diabetes),
        Some(ScoringError::ModelUnavailable(Disease::Diabetes))
    ));
}
