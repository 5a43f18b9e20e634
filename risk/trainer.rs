//! Candidate search, holdout evaluation and final model selection.

use crate::classifiers::{
    CandidateParams, FinalModel, ModelFamily, NamedClassifier, ProbabilisticClassifier,
    SoftVotingEnsemble,
};
use crate::data::LabeledDataset;
use crate::metrics::{ClassificationReport, accuracy, roc_auc};
use crate::preprocess::{FeaturePreprocessor, PreprocessError, PreprocessingArtifact};
use crate::profiles::DiseaseProfile;
use crate::progress::{NoopTrainingProgress, TrainingObserver, TrainingStage};
use crate::search::{SearchError, derive_seed, grid_search};
use crate::types::{Disease, RiskThresholds};
use chrono::{DateTime, Utc};
use log::{info, warn};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Bumped whenever the persisted bundle layout changes incompatibly.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Number of top candidates combined into the soft-voting ensemble.
const ENSEMBLE_SIZE: usize = 3;

/// Seed-stream tag for the final refit on the whole training split.
const REFIT_STREAM: u64 = u64::MAX;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("No candidate model could be trained for {disease}: {}", .failures.join("; "))]
    TrainingFailed {
        disease: Disease,
        failures: Vec<String>,
    },

    #[error("Training was cancelled.")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub seed: u64,
    pub cv_folds: usize,
    pub max_selected_features: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            cv_folds: 5,
            max_selected_features: 10,
        }
    }
}

/// A tuned candidate after its single holdout evaluation.
#[derive(Debug, Clone)]
pub struct EvaluatedCandidate {
    pub model: NamedClassifier,
    pub params: Option<CandidateParams>,
    pub cv_auc: Option<f64>,
    pub holdout_accuracy: f64,
    pub holdout_auc: f64,
}

impl EvaluatedCandidate {
    /// Evaluates an already fitted model on the holdout split.
    pub fn evaluate(
        model: NamedClassifier,
        params: Option<CandidateParams>,
        cv_auc: Option<f64>,
        x_holdout: ArrayView2<f64>,
        y_holdout: ArrayView1<f64>,
    ) -> Self {
        let probabilities = model.model.predict_probabilities(x_holdout);
        Self {
            holdout_accuracy: accuracy(y_holdout, probabilities.view()),
            holdout_auc: roc_auc(y_holdout, probabilities.view()),
            model,
            params,
            cv_auc,
        }
    }

    fn leaderboard_entry(&self) -> LeaderboardEntry {
        LeaderboardEntry {
            name: self.model.name.clone(),
            params: self.params,
            cv_auc: self.cv_auc,
            holdout_accuracy: self.holdout_accuracy,
            holdout_auc: self.holdout_auc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub params: Option<CandidateParams>,
    pub cv_auc: Option<f64>,
    pub holdout_accuracy: f64,
    pub holdout_auc: f64,
}

/// Outcome of the ensemble-versus-single decision.
#[derive(Debug, Clone)]
pub struct Selection {
    pub final_model: FinalModel,
    pub accuracy: f64,
    pub auc: f64,
    pub ensemble_members: Vec<String>,
    pub ensemble_accuracy: f64,
    pub ensemble_auc: f64,
}

/// Ranks candidates by holdout AUC (stable, so earlier roster entries win
/// ties), soft-votes the top three and keeps the ensemble only when its
/// holdout AUC is strictly greater than the best single candidate's.
///
/// Returns `None` for an empty candidate list.
pub fn select_final_model(
    mut candidates: Vec<EvaluatedCandidate>,
    x_holdout: ArrayView2<f64>,
    y_holdout: ArrayView1<f64>,
) -> Option<Selection> {
    candidates.sort_by(|a, b| b.holdout_auc.total_cmp(&a.holdout_auc));
    let best = candidates.first()?.clone();

    let members: Vec<NamedClassifier> = candidates
        .iter()
        .take(ENSEMBLE_SIZE)
        .map(|c| c.model.clone())
        .collect();
    let ensemble = SoftVotingEnsemble::new(members)?;
    let ensemble_probabilities = ensemble.predict_probabilities(x_holdout);
    let ensemble_auc = roc_auc(y_holdout, ensemble_probabilities.view());
    let ensemble_accuracy = accuracy(y_holdout, ensemble_probabilities.view());
    let ensemble_members = ensemble.member_names();

    info!(
        "Ensemble of [{}] holdout auc {ensemble_auc:.4}; best single {} auc {:.4}",
        ensemble_members.join(", "),
        best.model.name,
        best.holdout_auc
    );

    let selection = if ensemble_auc > best.holdout_auc {
        Selection {
            final_model: FinalModel::Ensemble(ensemble),
            accuracy: ensemble_accuracy,
            auc: ensemble_auc,
            ensemble_members,
            ensemble_accuracy,
            ensemble_auc,
        }
    } else {
        Selection {
            final_model: FinalModel::Single(best.model),
            accuracy: best.holdout_accuracy,
            auc: best.holdout_auc,
            ensemble_members,
            ensemble_accuracy,
            ensemble_auc,
        }
    };
    Some(selection)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    /// `"ensemble"` or the winning candidate's name.
    pub model_type: String,
    pub accuracy: f64,
    pub auc_score: f64,
    pub training_samples: usize,
    pub holdout_samples: usize,
    pub feature_count: usize,
    pub training_date: DateTime<Utc>,
    pub seed: u64,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub ensemble_members: Vec<String>,
    pub ensemble_accuracy: f64,
    pub ensemble_auc: f64,
    pub holdout_report: ClassificationReport,
}

/// The complete persisted unit for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelBundle {
    pub format_version: u32,
    pub disease: Disease,
    pub final_model: Option<FinalModel>,
    pub artifact: PreprocessingArtifact,
    pub selected_features: Vec<String>,
    pub metadata: TrainingMetadata,
    pub thresholds: RiskThresholds,
}

impl TrainedModelBundle {
    /// Importances keyed by selected feature name, for models that declare them.
    pub fn feature_importances(&self) -> Option<Vec<(String, f64)>> {
        let importances = self.final_model.as_ref()?.feature_importances()?;
        Some(
            self.selected_features
                .iter()
                .cloned()
                .zip(importances)
                .collect(),
        )
    }
}

pub struct ModelTrainer {
    options: TrainingOptions,
    cancel: Arc<AtomicBool>,
}

impl ModelTrainer {
    pub fn new(options: TrainingOptions) -> Self {
        Self {
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an externally owned cancellation flag. Setting it stops training
    /// at the next grid-point boundary.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn train(
        &self,
        training: &LabeledDataset,
        holdout: &LabeledDataset,
        profile: &DiseaseProfile,
    ) -> Result<TrainedModelBundle, TrainingError> {
        self.train_with_progress(training, holdout, profile, &mut NoopTrainingProgress)
    }

    pub fn train_with_progress(
        &self,
        training: &LabeledDataset,
        holdout: &LabeledDataset,
        profile: &DiseaseProfile,
        observer: &mut dyn TrainingObserver,
    ) -> Result<TrainedModelBundle, TrainingError> {
        let disease = profile.disease;
        info!(
            "Training {disease} on {} rows ({} positive), holding out {} rows",
            training.n_rows(),
            training.positives(),
            holdout.n_rows()
        );

        observer.on_stage_start(TrainingStage::Preprocessing, 1);
        let preprocessor = FeaturePreprocessor::new(profile, self.options.max_selected_features);
        let (artifact, x_train) = preprocessor.fit(&training.features, training.labels.view())?;
        let x_holdout = artifact.transform_frame(&holdout.features);
        let y_train = training.labels.view();
        let y_holdout = holdout.labels.view();
        observer.on_stage_advance(TrainingStage::Preprocessing, 1);
        observer.on_stage_finish(TrainingStage::Preprocessing);

        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for (family_index, family) in ModelFamily::ROSTER.into_iter().enumerate() {
            let grid = profile.grids.candidates(family);
            let stage = TrainingStage::GridSearch(family);
            observer.on_stage_start(stage, grid.len());
            let family_seed = derive_seed(self.options.seed, &[family_index as u64]);

            let outcome = match grid_search(
                &grid,
                x_train.view(),
                y_train,
                self.options.cv_folds,
                family_seed,
                &self.cancel,
            ) {
                Ok(outcome) => outcome,
                Err(SearchError::Cancelled) => {
                    info!("Training for {disease} cancelled during {family} search");
                    return Err(TrainingError::Cancelled);
                }
                Err(e) => {
                    warn!("Dropping {family}: {e}");
                    failures.push(format!("{family}: {e}"));
                    observer.on_stage_finish(stage);
                    continue;
                }
            };
            observer.on_stage_advance(stage, grid.len());

            let refit_seed = derive_seed(family_seed, &[REFIT_STREAM]);
            match outcome.best.fit(x_train.view(), y_train, refit_seed) {
                Ok(model) => {
                    let candidate = EvaluatedCandidate::evaluate(
                        NamedClassifier::new(family.name(), model),
                        Some(outcome.best),
                        outcome.best_score,
                        x_holdout.view(),
                        y_holdout,
                    );
                    info!(
                        "{family} [{}]: cv auc {}, holdout accuracy {:.4}, holdout auc {:.4}",
                        outcome.best,
                        outcome
                            .best_score
                            .map_or_else(|| "n/a".to_string(), |s| format!("{s:.4}")),
                        candidate.holdout_accuracy,
                        candidate.holdout_auc
                    );
                    candidates.push(candidate);
                }
                Err(e) => {
                    warn!("Dropping {family}: refit failed: {e}");
                    failures.push(format!("{family}: {e}"));
                }
            }
            observer.on_stage_finish(stage);
        }

        if self.cancel.load(Ordering::Relaxed) {
            return Err(TrainingError::Cancelled);
        }

        observer.on_stage_start(TrainingStage::Ensemble, 1);
        let leaderboard: Vec<LeaderboardEntry> =
            candidates.iter().map(EvaluatedCandidate::leaderboard_entry).collect();
        let Some(selection) = select_final_model(candidates, x_holdout.view(), y_holdout) else {
            return Err(TrainingError::TrainingFailed { disease, failures });
        };
        observer.on_stage_advance(TrainingStage::Ensemble, 1);
        observer.on_stage_finish(TrainingStage::Ensemble);

        let final_probabilities = selection.final_model.predict_probabilities(x_holdout.view());
        let report = ClassificationReport::new(y_holdout, final_probabilities.view());
        info!(
            "Selected {} for {disease}: accuracy {:.4}, auc {:.4}\n{report}",
            selection.final_model.model_type(),
            selection.accuracy,
            selection.auc
        );

        let selected_features = artifact.selected_names().to_vec();
        Ok(TrainedModelBundle {
            format_version: BUNDLE_FORMAT_VERSION,
            disease,
            metadata: TrainingMetadata {
                model_type: selection.final_model.model_type().to_string(),
                accuracy: selection.accuracy,
                auc_score: selection.auc,
                training_samples: training.n_rows(),
                holdout_samples: holdout.n_rows(),
                feature_count: selected_features.len(),
                training_date: Utc::now(),
                seed: self.options.seed,
                leaderboard,
                ensemble_members: selection.ensemble_members,
                ensemble_accuracy: selection.ensemble_accuracy,
                ensemble_auc: selection.ensemble_auc,
                holdout_report: report,
            },
            final_model: Some(selection.final_model),
            artifact,
            selected_features,
            thresholds: profile.thresholds,
        })
    }
}
