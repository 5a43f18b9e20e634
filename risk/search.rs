//! Stratified k-fold cross-validation over a family's hyperparameter grid.

use crate::classifiers::{CandidateParams, ClassifierError, ProbabilisticClassifier};
use crate::metrics::roc_auc;
use log::{debug, warn};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("The hyperparameter grid is empty.")]
    EmptyGrid,

    #[error("Every grid point failed to fit; last error: {0}")]
    AllPointsFailed(ClassifierError),

    #[error("Training was cancelled.")]
    Cancelled,
}

/// Result of one family's search.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchOutcome {
    pub best: CandidateParams,
    /// Mean fold AUC of `best`; `None` when there were too few rows per class
    /// to cross-validate and the first grid point was taken.
    pub best_score: Option<f64>,
    /// Mean fold AUC per grid point, `None` where fitting failed.
    pub scores: Vec<Option<f64>>,
}

/// Mixes `parts` into `base` with SplitMix64 so every fit gets its own stream.
pub fn derive_seed(base: u64, parts: &[u64]) -> u64 {
    parts.iter().fold(base, |acc, part| {
        let mut z = acc ^ part.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    })
}

/// Number of folds usable without leaving a fold with no minority example.
pub fn effective_folds(y: ArrayView1<f64>, requested: usize) -> usize {
    let positives = y.iter().filter(|v| **v > 0.5).count();
    let minority = positives.min(y.len() - positives);
    requested.min(minority)
}

/// Fold index per row: the i-th row of each class goes to fold `i % k`.
pub fn stratified_fold_assignment(y: ArrayView1<f64>, k: usize) -> Vec<usize> {
    let mut seen = [0usize; 2];
    y.iter()
        .map(|v| {
            let class = usize::from(*v > 0.5);
            let fold = seen[class] % k;
            seen[class] += 1;
            fold
        })
        .collect()
}

fn cross_validate(
    params: &CandidateParams,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    assignment: &[usize],
    k: usize,
    seed: u64,
) -> Result<f64, ClassifierError> {
    let mut total = 0.0;
    for fold in 0..k {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..y.len()).partition(|&i| assignment[i] == fold);
        let x_train = x.select(Axis(0), &train);
        let y_train = y.select(Axis(0), &train);
        let model = params.fit(x_train.view(), y_train.view(), derive_seed(seed, &[fold as u64]))?;
        let x_test = x.select(Axis(0), &test);
        let y_test = y.select(Axis(0), &test);
        let probabilities = model.predict_probabilities(x_test.view());
        total += roc_auc(y_test.view(), probabilities.view());
    }
    Ok(total / k as f64)
}

/// Scores every grid point by mean stratified k-fold AUC and returns the best,
/// ties going to the earliest point. Points are evaluated in parallel but the
/// result does not depend on scheduling. `cancel` is checked before each point.
pub fn grid_search(
    candidates: &[CandidateParams],
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    requested_folds: usize,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<GridSearchOutcome, SearchError> {
    let Some(first) = candidates.first() else {
        return Err(SearchError::EmptyGrid);
    };
    if cancel.load(Ordering::Relaxed) {
        return Err(SearchError::Cancelled);
    }

    let k = effective_folds(y, requested_folds);
    if k < 2 {
        warn!(
            "Only {k} rows in the minority class; skipping cross-validation for {}",
            first.family()
        );
        return Ok(GridSearchOutcome {
            best: *first,
            best_score: None,
            scores: vec![None; candidates.len()],
        });
    }
    if k < requested_folds {
        debug!("Reduced cross-validation from {requested_folds} to {k} folds");
    }
    let assignment = stratified_fold_assignment(y, k);

    let results: Vec<Option<Result<f64, ClassifierError>>> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, params)| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            Some(cross_validate(
                params,
                x,
                y,
                &assignment,
                k,
                derive_seed(seed, &[index as u64]),
            ))
        })
        .collect();

    if results.iter().any(Option::is_none) {
        return Err(SearchError::Cancelled);
    }

    let mut best: Option<(usize, f64)> = None;
    let mut last_error = None;
    let mut scores = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().flatten().enumerate() {
        match result {
            Ok(score) => {
                debug!("{} [{}] cv auc {score:.4}", candidates[index].family(), candidates[index]);
                if best.is_none_or(|(_, b)| score > b) {
                    best = Some((index, score));
                }
                scores.push(Some(score));
            }
            Err(e) => {
                warn!(
                    "{} [{}] failed during cross-validation: {e}",
                    candidates[index].family(),
                    candidates[index]
                );
                last_error = Some(e);
                scores.push(None);
            }
        }
    }

    match (best, last_error) {
        (Some((index, score)), _) => Ok(GridSearchOutcome {
            best: candidates[index],
            best_score: Some(score),
            scores,
        }),
        (None, Some(e)) => Err(SearchError::AllPointsFailed(e)),
        (None, None) => Err(SearchError::EmptyGrid),
    }
}
