//! Column-oriented training tables: CSV loading, label resolution and the
//! stratified train/holdout split.

use crate::profiles::{DiseaseProfile, LabelRule, TargetCandidate};
use crate::types::{Disease, FeatureValue, PatientRecord};
use log::{info, warn};
use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cell texts treated as missing, compared case-insensitively after trimming.
const MISSING_TOKENS: [&str; 6] = ["", "?", "na", "nan", "null", "none"];

#[derive(Error, Debug)]
pub enum DataError {
    #[error(
        "No label column found for {disease}. Looked for: {}.",
        .candidates.join(", ")
    )]
    TargetColumnNotFound {
        disease: Disease,
        candidates: Vec<String>,
    },

    #[error("Labels in column '{column}' are unusable: {reason}")]
    InvalidLabels { column: String, reason: String },

    #[error("Each class needs at least {needed} rows to be split, but class {class} has {found}.")]
    InsufficientRows {
        class: u8,
        needed: usize,
        found: usize,
    },

    #[error("The dataset contains no data rows.")]
    EmptyDataset,

    #[error("Column '{column}' has {found} values, expected {expected}.")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Failed to read CSV data: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to open dataset '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn value(&self, row: usize) -> FeatureValue {
        match self {
            Self::Numeric(v) => match v[row] {
                Some(x) if x.is_finite() => FeatureValue::Numeric(x),
                _ => FeatureValue::Missing,
            },
            Self::Categorical(v) => match &v[row] {
                Some(s) => FeatureValue::Categorical(s.clone()),
                None => FeatureValue::Missing,
            },
        }
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Self::Categorical(v) => Self::Categorical(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub data: ColumnData,
}

impl FeatureColumn {
    pub fn numeric(name: &str, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: &str, values: Vec<Option<&str>>) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Categorical(
                values.into_iter().map(|v| v.map(str::to_string)).collect(),
            ),
        }
    }
}

/// A table of named feature columns that all share one row count.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<FeatureColumn>,
    n_rows: usize,
}

impl FeatureFrame {
    pub fn new(columns: Vec<FeatureColumn>) -> Result<Self, DataError> {
        let n_rows = columns.first().map_or(0, |c| c.data.len());
        if let Some(bad) = columns.iter().find(|c| c.data.len() != n_rows) {
            return Err(DataError::ColumnLengthMismatch {
                column: bad.name.clone(),
                expected: n_rows,
                found: bad.data.len(),
            });
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The row as a record; missing cells become explicit `Missing` values.
    pub fn row(&self, index: usize) -> PatientRecord {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data.value(index)))
            .collect()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| FeatureColumn {
                    name: c.name.clone(),
                    data: c.data.select(rows),
                })
                .collect(),
            n_rows: rows.len(),
        }
    }
}

/// Feature table plus 0/1 labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    pub features: FeatureFrame,
    pub labels: Array1<f64>,
    pub target_column: String,
}

impl LabeledDataset {
    pub fn new(
        features: FeatureFrame,
        labels: Array1<f64>,
        target_column: &str,
    ) -> Result<Self, DataError> {
        if labels.len() != features.n_rows() {
            return Err(DataError::ColumnLengthMismatch {
                column: target_column.to_string(),
                expected: features.n_rows(),
                found: labels.len(),
            });
        }
        Ok(Self {
            features,
            labels,
            target_column: target_column.to_string(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|v| **v > 0.5).count()
    }

    pub fn from_csv_path(path: &Path, profile: &DiseaseProfile) -> Result<Self, DataError> {
        let file = std::fs::File::open(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_csv_reader(file, profile)?;
        info!(
            "Loaded {} rows and {} feature columns from {} (label column '{}', {} positive)",
            dataset.n_rows(),
            dataset.features.n_columns(),
            path.display(),
            dataset.target_column,
            dataset.positives()
        );
        Ok(dataset)
    }

    /// Reads a headed CSV, resolves the disease's label column and infers each
    /// remaining column's kind. Header names are normalised to snake_case.
    pub fn from_csv_reader<R: Read>(reader: R, profile: &DiseaseProfile) -> Result<Self, DataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = unique_names(csv_reader.headers()?.iter().map(normalize_column_name));
        let missing = profile.missing_from(headers.iter().map(String::as_str));
        if !missing.is_empty() {
            info!(
                "{} data lacks declared features: {}",
                profile.disease,
                missing.join(", ")
            );
        }
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in csv_reader.records() {
            let record = record?;
            for (column, cell) in cells.iter_mut().zip(record.iter()) {
                column.push(parse_cell(cell));
            }
        }
        if cells.first().is_none_or(|c| c.is_empty()) {
            return Err(DataError::EmptyDataset);
        }

        let (target_index, candidate) = resolve_target(&headers, profile)?;
        let raw_labels = apply_label_rule(&headers[target_index], &cells[target_index], &candidate.rule)?;

        let keep: Vec<usize> = raw_labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.map(|_| i))
            .collect();
        let dropped = raw_labels.len() - keep.len();
        if dropped > 0 {
            warn!("Dropped {dropped} rows with a missing label in '{}'", headers[target_index]);
        }
        let labels: Array1<f64> = keep.iter().filter_map(|&i| raw_labels[i]).collect();
        let positives = labels.iter().filter(|v| **v > 0.5).count();
        if positives == 0 || positives == labels.len() {
            return Err(DataError::InvalidLabels {
                column: headers[target_index].clone(),
                reason: "both classes must be present".to_string(),
            });
        }

        let excluded: HashSet<String> = profile
            .excluded_columns
            .iter()
            .map(|c| normalize_column_name(c))
            .collect();
        let columns = headers
            .iter()
            .zip(cells)
            .enumerate()
            .filter(|(i, (name, _))| *i != target_index && !excluded.contains(*name))
            .map(|(_, (name, column))| {
                let kept: Vec<Option<String>> = keep.iter().map(|&r| column[r].clone()).collect();
                build_column(name, kept)
            })
            .collect();

        let features = FeatureFrame::new(columns)?;
        Self::new(features, labels, &headers[target_index])
    }

    /// Splits per class so both halves keep the label balance. Within each
    /// class the rows are shuffled by `seed`; each half preserves file order.
    pub fn stratified_split(
        &self,
        holdout_fraction: f64,
        seed: u64,
    ) -> Result<(LabeledDataset, LabeledDataset), DataError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut train_rows = Vec::new();
        let mut holdout_rows = Vec::new();

        for class in [0u8, 1u8] {
            let mut members: Vec<usize> = self
                .labels
                .iter()
                .enumerate()
                .filter(|(_, v)| (**v > 0.5) == (class == 1))
                .map(|(i, _)| i)
                .collect();
            if members.len() < 2 {
                return Err(DataError::InsufficientRows {
                    class,
                    needed: 2,
                    found: members.len(),
                });
            }
            members.shuffle(&mut rng);
            let n_holdout = ((members.len() as f64 * holdout_fraction).round() as usize)
                .clamp(1, members.len() - 1);
            holdout_rows.extend_from_slice(&members[..n_holdout]);
            train_rows.extend_from_slice(&members[n_holdout..]);
        }
        train_rows.sort_unstable();
        holdout_rows.sort_unstable();

        Ok((self.subset(&train_rows), self.subset(&holdout_rows)))
    }

    fn subset(&self, rows: &[usize]) -> LabeledDataset {
        LabeledDataset {
            features: self.features.select_rows(rows),
            labels: rows.iter().map(|&i| self.labels[i]).collect(),
            target_column: self.target_column.clone(),
        }
    }
}

/// Lowercases and joins alphanumeric runs with single underscores, so
/// `"Blood Pressure"`, `"HeartDisease"` and `"Unnamed: 0"` become
/// `blood_pressure`, `heartdisease` and `unnamed_0`.
pub fn normalize_column_name(raw: &str) -> String {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

fn unique_names(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|name| {
            let mut candidate = name.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{name}_{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}

fn parse_cell(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if MISSING_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn build_column(name: &str, cells: Vec<Option<String>>) -> FeatureColumn {
    let parsed: Option<Vec<Option<f64>>> = cells
        .iter()
        .map(|cell| match cell {
            None => Some(None),
            Some(text) => text.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some),
        })
        .collect();
    FeatureColumn {
        name: name.to_string(),
        data: match parsed {
            Some(values) => ColumnData::Numeric(values),
            None => ColumnData::Categorical(cells),
        },
    }
}

fn resolve_target<'a>(
    headers: &[String],
    profile: &'a DiseaseProfile,
) -> Result<(usize, &'a TargetCandidate), DataError> {
    profile
        .target_candidates
        .iter()
        .find_map(|candidate| {
            let wanted = normalize_column_name(&candidate.column);
            headers
                .iter()
                .position(|h| *h == wanted)
                .map(|index| (index, candidate))
        })
        .ok_or_else(|| DataError::TargetColumnNotFound {
            disease: profile.disease,
            candidates: profile
                .target_candidates
                .iter()
                .map(|c| c.column.clone())
                .collect(),
        })
}

/// Binarises one label column. `None` marks a row to drop.
fn apply_label_rule(
    column: &str,
    cells: &[Option<String>],
    rule: &LabelRule,
) -> Result<Vec<Option<f64>>, DataError> {
    let numeric = |cell: &Option<String>| cell.as_deref().and_then(|t| t.parse::<f64>().ok());
    let indicator = |flag: bool| if flag { 1.0 } else { 0.0 };

    let labels = match rule {
        LabelRule::Binary => {
            let all_numeric = cells.iter().flatten().all(|t| t.parse::<f64>().is_ok());
            if all_numeric {
                cells.iter().map(|c| numeric(c).map(|v| indicator(v > 0.0))).collect()
            } else {
                let classes: BTreeSet<String> =
                    cells.iter().flatten().map(|t| t.to_lowercase()).collect();
                if classes.len() != 2 {
                    return Err(DataError::InvalidLabels {
                        column: column.to_string(),
                        reason: format!(
                            "expected exactly two text classes, found {}",
                            classes.len()
                        ),
                    });
                }
                let positive = classes.iter().next_back().cloned().unwrap_or_default();
                cells
                    .iter()
                    .map(|c| c.as_ref().map(|t| indicator(t.to_lowercase() == positive)))
                    .collect()
            }
        }
        LabelRule::PositiveAboveZero => cells
            .iter()
            .map(|c| numeric(c).map(|v| indicator(v > 0.0)))
            .collect(),
        LabelRule::AtLeast { threshold } => cells
            .iter()
            .map(|c| numeric(c).map(|v| indicator(v >= *threshold)))
            .collect(),
        LabelRule::Mapping { table } => cells
            .iter()
            .map(|c| {
                let key = c.as_deref().map(str::to_lowercase).unwrap_or_default();
                let mapped = table
                    .iter()
                    .find(|(k, _)| k.to_lowercase() == key)
                    .map_or(0, |(_, v)| *v);
                Some(indicator(mapped > 0))
            })
            .collect(),
    };
    Ok(labels)
}
