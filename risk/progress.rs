use crate::classifiers::ModelFamily;
use std::fmt;

/// Stages reported while training one disease.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrainingStage {
    Preprocessing,
    GridSearch(ModelFamily),
    Ensemble,
}

impl TrainingStage {
    pub fn describe(self) -> String {
        match self {
            Self::Preprocessing => "feature preprocessing".to_string(),
            Self::GridSearch(family) => format!("{family} grid search"),
            Self::Ensemble => "ensemble selection".to_string(),
        }
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Observer for reporting incremental progress while training.
pub trait TrainingObserver {
    fn on_stage_start(&mut self, stage: TrainingStage, total_steps: usize) {
        let _ = (stage, total_steps);
    }
    fn on_stage_advance(&mut self, stage: TrainingStage, completed_steps: usize) {
        let _ = (stage, completed_steps);
    }
    fn on_stage_finish(&mut self, stage: TrainingStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopTrainingProgress;

impl TrainingObserver for NoopTrainingProgress {}
