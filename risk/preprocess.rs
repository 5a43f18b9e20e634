//! Per-disease feature preprocessing: impute, encode, scale, select.
//!
//! [`FeaturePreprocessor::fit`] learns every statistic from the training split
//! and freezes it in a [`PreprocessingArtifact`]. Inference goes through
//! [`PreprocessingArtifact::transform`], which only reads those tables. Table
//! cells, at fit time and afterwards, take the same path through
//! `resolve_value`, so the fitted training matrix equals `transform_frame` of
//! the training table. Declared defaults fill gaps in single records only;
//! missing table cells always get the training median or mode.

use crate::data::{ColumnData, ColumnKind, FeatureFrame};
use crate::profiles::DiseaseProfile;
use crate::types::{FeatureValue, PatientRecord};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error(
        "Record contains none of the required features ({}) and none of them has a default.",
        .missing.join(", ")
    )]
    SchemaMismatch { missing: Vec<String> },

    #[error("No feature column has any observed value in the training data.")]
    NoUsableColumns,

    #[error("Cannot fit preprocessing on an empty training set.")]
    EmptyTrainingSet,

    #[error("Training table has {rows} rows but {labels} labels were supplied.")]
    LengthMismatch { rows: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

/// Frozen label encoding of one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoding {
    /// Category to contiguous code, assigned in lexicographic order.
    pub codes: BTreeMap<String, u32>,
    /// Substituted for categories never seen during fitting.
    pub fallback: String,
}

impl CategoryEncoding {
    fn code(&self, category: &str) -> f64 {
        let code = self
            .codes
            .get(category)
            .or_else(|| self.codes.get(&self.fallback))
            .copied()
            .unwrap_or(0);
        f64::from(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub mean: f64,
    /// Population standard deviation; stored as 1 for constant columns.
    pub std: f64,
}

/// Everything needed to reproduce the training-time transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingArtifact {
    columns: Vec<ColumnSchema>,
    medians: BTreeMap<String, f64>,
    modes: BTreeMap<String, String>,
    encodings: BTreeMap<String, CategoryEncoding>,
    scaling: Vec<ScaleParams>,
    selected_indices: Vec<usize>,
    selected_names: Vec<String>,
    scores: Vec<f64>,
    required_features: Vec<String>,
    feature_defaults: BTreeMap<String, FeatureValue>,
}

pub struct FeaturePreprocessor<'a> {
    profile: &'a DiseaseProfile,
    max_selected_features: usize,
}

impl<'a> FeaturePreprocessor<'a> {
    pub fn new(profile: &'a DiseaseProfile, max_selected_features: usize) -> Self {
        Self {
            profile,
            max_selected_features: max_selected_features.max(1),
        }
    }

    /// Learns the artifact from the training split and returns it with the
    /// transformed training matrix (rows x selected features).
    pub fn fit(
        &self,
        features: &FeatureFrame,
        labels: ArrayView1<f64>,
    ) -> Result<(PreprocessingArtifact, Array2<f64>), PreprocessError> {
        if features.n_rows() == 0 {
            return Err(PreprocessError::EmptyTrainingSet);
        }
        if features.n_rows() != labels.len() {
            return Err(PreprocessError::LengthMismatch {
                rows: features.n_rows(),
                labels: labels.len(),
            });
        }

        let mut columns = Vec::new();
        let mut medians = BTreeMap::new();
        let mut modes = BTreeMap::new();
        let mut encodings = BTreeMap::new();

        for column in features.columns() {
            match &column.data {
                ColumnData::Numeric(values) => {
                    let observed: Vec<f64> =
                        values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
                    let Some(median) = median(observed) else {
                        warn!("Skipping column '{}': no observed training values", column.name);
                        continue;
                    };
                    medians.insert(column.name.clone(), median);
                }
                ColumnData::Categorical(values) => {
                    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                    for v in values.iter().flatten() {
                        *counts.entry(v.as_str()).or_default() += 1;
                    }
                    let Some(mode) = mode(&counts) else {
                        warn!("Skipping column '{}': no observed training values", column.name);
                        continue;
                    };
                    let codes = counts
                        .keys()
                        .enumerate()
                        .map(|(code, category)| (category.to_string(), code as u32))
                        .collect();
                    modes.insert(column.name.clone(), mode.clone());
                    encodings.insert(
                        column.name.clone(),
                        CategoryEncoding {
                            codes,
                            fallback: mode,
                        },
                    );
                }
            }
            columns.push(ColumnSchema {
                name: column.name.clone(),
                kind: column.data.kind(),
            });
        }

        if columns.is_empty() {
            return Err(PreprocessError::NoUsableColumns);
        }

        let mut artifact = PreprocessingArtifact {
            columns,
            medians,
            modes,
            encodings,
            scaling: Vec::new(),
            selected_indices: Vec::new(),
            selected_names: Vec::new(),
            scores: Vec::new(),
            required_features: self.profile.required_features.clone(),
            feature_defaults: self.profile.feature_defaults.clone(),
        };

        let mut matrix = artifact.encode_frame(features);
        artifact.scaling = matrix
            .axis_iter(Axis(1))
            .map(|column| {
                let mean = column.mean().unwrap_or(0.0);
                let std = column.std(0.0);
                ScaleParams {
                    mean,
                    std: if std > 0.0 && std.is_finite() { std } else { 1.0 },
                }
            })
            .collect();
        for (mut column, scale) in matrix.axis_iter_mut(Axis(1)).zip(&artifact.scaling) {
            column.mapv_inplace(|v| (v - scale.mean) / scale.std);
        }

        artifact.scores = matrix
            .axis_iter(Axis(1))
            .map(|column| anova_f_score(column, labels))
            .collect();
        let k = self.max_selected_features.min(artifact.columns.len());
        let mut ranked: Vec<usize> = (0..artifact.columns.len()).collect();
        ranked.sort_by(|&a, &b| artifact.scores[b].total_cmp(&artifact.scores[a]));
        let mut selected = ranked[..k].to_vec();
        selected.sort_unstable();

        artifact.selected_names = selected
            .iter()
            .map(|&i| artifact.columns[i].name.clone())
            .collect();
        artifact.selected_indices = selected;
        debug!(
            "Selected {} of {} columns: {:?}",
            k,
            artifact.columns.len(),
            artifact.selected_names
        );

        let selected_matrix = matrix.select(Axis(1), &artifact.selected_indices);
        Ok((artifact, selected_matrix))
    }

    pub fn transform(
        record: &PatientRecord,
        artifact: &PreprocessingArtifact,
    ) -> Result<Array1<f64>, PreprocessError> {
        artifact.transform(record)
    }
}

impl PreprocessingArtifact {
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn selected_names(&self) -> &[String] {
        &self.selected_names
    }

    pub fn selected_indices(&self) -> &[usize] {
        &self.selected_indices
    }

    /// Univariate ANOVA F scores of every training column, in column order.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn median(&self, column: &str) -> Option<f64> {
        self.medians.get(column).copied()
    }

    pub fn mode(&self, column: &str) -> Option<&str> {
        self.modes.get(column).map(String::as_str)
    }

    pub fn encoding(&self, column: &str) -> Option<&CategoryEncoding> {
        self.encodings.get(column)
    }

    /// Maps one record to the selected, scaled feature vector.
    ///
    /// Fails with [`PreprocessError::SchemaMismatch`] only when the record
    /// carries none of the required features that existed at training time and
    /// none of those has a declared default.
    pub fn transform(&self, record: &PatientRecord) -> Result<Array1<f64>, PreprocessError> {
        let required: Vec<&String> = self
            .required_features
            .iter()
            .filter(|name| self.columns.iter().any(|c| &c.name == *name))
            .collect();
        let satisfied = required
            .iter()
            .any(|name| record.get(name).is_some() || self.feature_defaults.contains_key(*name));
        if !required.is_empty() && !satisfied {
            return Err(PreprocessError::SchemaMismatch {
                missing: required.into_iter().cloned().collect(),
            });
        }
        Ok(self.transform_record(record, true))
    }

    /// Applies the artifact to a whole table, e.g. the holdout split. Columns
    /// absent from `frame` are imputed like missing cells.
    pub fn transform_frame(&self, frame: &FeatureFrame) -> Array2<f64> {
        let mut out = Array2::zeros((frame.n_rows(), self.selected_indices.len()));
        for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
            row.assign(&self.transform_record(&frame.row(i), false));
        }
        out
    }

    fn transform_record(&self, record: &PatientRecord, with_defaults: bool) -> Array1<f64> {
        self.selected_indices
            .iter()
            .map(|&i| {
                let column = &self.columns[i];
                let scale = &self.scaling[i];
                let value = record.get(&column.name).or_else(|| {
                    with_defaults
                        .then(|| self.feature_defaults.get(&column.name))
                        .flatten()
                        .filter(|v| !v.is_absent())
                });
                (self.resolve_value(column, value) - scale.mean) / scale.std
            })
            .collect()
    }

    /// The given value, else the frozen imputation statistic.
    fn resolve_value(&self, column: &ColumnSchema, value: Option<&FeatureValue>) -> f64 {
        match column.kind {
            ColumnKind::Numeric => {
                let parsed = match value {
                    Some(FeatureValue::Numeric(v)) => Some(*v),
                    Some(FeatureValue::Categorical(text)) => {
                        text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
                    }
                    _ => None,
                };
                parsed
                    .or_else(|| self.medians.get(&column.name).copied())
                    .unwrap_or(0.0)
            }
            ColumnKind::Categorical => {
                let Some(encoding) = self.encodings.get(&column.name) else {
                    return 0.0;
                };
                match value {
                    Some(FeatureValue::Categorical(text)) => encoding.code(text),
                    Some(FeatureValue::Numeric(v)) => encoding.code(&v.to_string()),
                    _ => {
                        let mode = self.modes.get(&column.name).unwrap_or(&encoding.fallback);
                        encoding.code(mode)
                    }
                }
            }
        }
    }

    /// Imputed and encoded but unscaled values of every artifact column.
    fn encode_frame(&self, frame: &FeatureFrame) -> Array2<f64> {
        let mut out = Array2::zeros((frame.n_rows(), self.columns.len()));
        for (j, schema) in self.columns.iter().enumerate() {
            let source = frame.column(&schema.name);
            for i in 0..frame.n_rows() {
                let cell = source.map(|c| c.data.value(i)).filter(|v| !v.is_absent());
                out[[i, j]] = self.resolve_value(schema, cell.as_ref());
            }
        }
        out
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    })
}

/// Most frequent category; ties go to the lexicographically smallest.
fn mode(counts: &BTreeMap<&str, usize>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for (category, &count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((category, count));
        }
    }
    best.map(|(category, _)| category.to_string())
}

/// One-way ANOVA F statistic of a column against a binary label. Degenerate
/// cases (a constant column, a single class) score zero.
fn anova_f_score(column: ArrayView1<f64>, labels: ArrayView1<f64>) -> f64 {
    let n = column.len();
    let mut sums = [0.0; 2];
    let mut counts = [0usize; 2];
    for (x, y) in column.iter().zip(labels.iter()) {
        let class = usize::from(*y > 0.5);
        sums[class] += x;
        counts[class] += 1;
    }
    if counts[0] == 0 || counts[1] == 0 || n <= 2 {
        return 0.0;
    }
    let grand_mean = (sums[0] + sums[1]) / n as f64;
    let class_means = [sums[0] / counts[0] as f64, sums[1] / counts[1] as f64];

    let between: f64 = (0..2)
        .map(|k| counts[k] as f64 * (class_means[k] - grand_mean).powi(2))
        .sum();
    let within: f64 = column
        .iter()
        .zip(labels.iter())
        .map(|(x, y)| (x - class_means[usize::from(*y > 0.5)]).powi(2))
        .sum();

    let f = between / (within / (n - 2) as f64);
    if f.is_finite() { f } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureColumn;
    use crate::types::Disease;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn training_frame() -> (FeatureFrame, Array1<f64>) {
        let frame = FeatureFrame::new(vec![
            FeatureColumn::numeric(
                "glucose",
                vec![Some(80.0), Some(90.0), None, Some(150.0), Some(160.0), Some(170.0)],
            ),
            FeatureColumn::numeric("bmi", vec![Some(22.0), Some(30.0), Some(25.0), Some(24.0), Some(31.0), Some(27.0)]),
            FeatureColumn::categorical(
                "smoking_status",
                vec![Some("never"), Some("never"), Some("former"), Some("current"), None, Some("current")],
            ),
            FeatureColumn::numeric("empty", vec![None; 6]),
        ])
        .unwrap();
        (frame, array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0])
    }

    fn fitted() -> (PreprocessingArtifact, Array2<f64>) {
        let profile = DiseaseProfile::builtin(Disease::Diabetes);
        let (frame, labels) = training_frame();
        FeaturePreprocessor::new(&profile, 10)
            .fit(&frame, labels.view())
            .unwrap()
    }

    #[test]
    fn fit_freezes_statistics_and_drops_unobserved_columns() {
        let (artifact, matrix) = fitted();
        assert_eq!(artifact.columns().len(), 3);
        assert_eq!(matrix.dim(), (6, 3));
        assert_eq!(artifact.median("glucose"), Some(150.0));
        // never and current tie at two; the smaller category wins.
        assert_eq!(artifact.mode("smoking_status"), Some("current"));
        let encoding = artifact.encoding("smoking_status").unwrap();
        assert_eq!(encoding.codes.get("current"), Some(&0));
        assert_eq!(encoding.codes.get("former"), Some(&1));
        assert_eq!(encoding.codes.get("never"), Some(&2));
        for column in matrix.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn training_matrix_matches_frame_transform() {
        let (artifact, matrix) = fitted();
        let (frame, _) = training_frame();
        assert_eq!(artifact.transform_frame(&frame), matrix);
    }

    #[test]
    fn transform_is_idempotent_and_leaves_the_artifact_alone() {
        let (artifact, _) = fitted();
        let snapshot = artifact.clone();
        let record = PatientRecord::new()
            .with("glucose", 140.0)
            .with("smoking_status", "never");
        let first = artifact.transform(&record).unwrap();
        let second = artifact.transform(&record).unwrap();
        assert_eq!(first, second);
        assert_eq!(artifact, snapshot);
    }

    #[test]
    fn unseen_category_encodes_as_the_training_mode() {
        let (artifact, _) = fitted();
        let base = PatientRecord::new().with("glucose", 120.0).with("bmi", 26.0);
        let unseen = artifact
            .transform(&base.clone().with("smoking_status", "occasional"))
            .unwrap();
        let mode = artifact
            .transform(&base.with("smoking_status", "current"))
            .unwrap();
        assert_eq!(unseen, mode);
    }

    #[test]
    fn record_without_required_features_is_a_schema_mismatch() {
        let (artifact, _) = fitted();
        let record = PatientRecord::new().with("smoking_status", "never");
        match artifact.transform(&record) {
            Err(PreprocessError::SchemaMismatch { missing }) => {
                assert_eq!(missing, vec!["glucose", "bmi"]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn declared_default_satisfies_the_required_check() {
        let mut profile = DiseaseProfile::builtin(Disease::Diabetes);
        profile
            .feature_defaults
            .insert("glucose".to_string(), FeatureValue::Numeric(100.0));
        let (frame, labels) = training_frame();
        let (artifact, _) = FeaturePreprocessor::new(&profile, 10)
            .fit(&frame, labels.view())
            .unwrap();
        let empty = artifact.transform(&PatientRecord::new()).unwrap();
        let explicit = artifact
            .transform(&PatientRecord::new().with("glucose", 100.0))
            .unwrap();
        assert_eq!(empty, explicit);
    }

    #[test]
    fn declared_defaults_leave_training_imputation_to_the_median() {
        let mut profile = DiseaseProfile::builtin(Disease::Diabetes);
        profile
            .feature_defaults
            .insert("glucose".to_string(), FeatureValue::Numeric(0.0));
        let (frame, labels) = training_frame();
        let (artifact, matrix) = FeaturePreprocessor::new(&profile, 10)
            .fit(&frame, labels.view())
            .unwrap();
        let (plain, plain_matrix) = fitted();
        assert_eq!(matrix, plain_matrix);
        assert_eq!(artifact.transform_frame(&frame), matrix);

        let glucose = artifact
            .selected_names()
            .iter()
            .position(|name| name == "glucose")
            .unwrap();
        // Row 2 is the blank glucose cell; row 3 holds the median itself.
        assert_eq!(matrix[[2, glucose]], matrix[[3, glucose]]);

        // A single record still picks up the declared default.
        let defaulted = artifact.transform(&PatientRecord::new().with("bmi", 25.0)).unwrap();
        let imputed = plain.transform(&PatientRecord::new().with("bmi", 25.0)).unwrap();
        assert!(defaulted[glucose] < imputed[glucose]);
    }

    #[test]
    fn selection_keeps_the_most_discriminative_columns_in_order() {
        let profile = DiseaseProfile::builtin(Disease::Diabetes);
        let (frame, labels) = training_frame();
        let (artifact, matrix) = FeaturePreprocessor::new(&profile, 2)
            .fit(&frame, labels.view())
            .unwrap();
        assert_eq!(matrix.ncols(), 2);
        assert_eq!(artifact.selected_names()[0], "glucose");
        let indices = artifact.selected_indices();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let record = PatientRecord::new().with("glucose", 100.0);
        assert_eq!(artifact.transform(&record).unwrap().len(), 2);
    }

    #[test]
    fn no_observed_values_anywhere_is_an_error() {
        let profile = DiseaseProfile::builtin(Disease::Diabetes);
        let frame = FeatureFrame::new(vec![FeatureColumn::numeric("glucose", vec![None, None])]).unwrap();
        assert_eq!(
            FeaturePreprocessor::new(&profile, 10)
                .fit(&frame, array![0.0, 1.0].view())
                .unwrap_err(),
            PreprocessError::NoUsableColumns
        );
    }

    #[test]
    fn f_score_of_a_perfect_split_dominates_noise() {
        let labels = array![0.0, 0.0, 1.0, 1.0];
        let strong = anova_f_score(array![0.0, 0.1, 1.0, 1.1].view(), labels.view());
        let weak = anova_f_score(array![0.0, 1.0, 0.0, 1.0].view(), labels.view());
        assert!(strong > 100.0);
        assert_eq!(weak, 0.0);
        assert_eq!(anova_f_score(array![1.0, 1.0, 1.0, 1.0].view(), labels.view()), 0.0);
    }
}
