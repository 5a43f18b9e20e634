//! On-disk persistence of trained bundles, one gzip-compressed JSON file per
//! disease.

use crate::config::PipelineConfig;
use crate::trainer::{BUNDLE_FORMAT_VERSION, TrainedModelBundle};
use crate::types::Disease;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BUNDLE_EXTENSION: &str = "json.gz";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No saved model for {disease} at '{}'.", .path.display())]
    ModelNotFound { disease: Disease, path: PathBuf },

    #[error("Saved model at '{}' is unusable: {reason}", .path.display())]
    ModelCorrupt { path: PathBuf, reason: String },

    #[error("Failed to write model file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize model bundle: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Loaded bundles keyed by disease. Owned by the caller and passed to batch
/// scoring explicitly.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    bundles: BTreeMap<Disease, TrainedModelBundle>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the bundle for its disease.
    pub fn insert(&mut self, bundle: TrainedModelBundle) {
        self.bundles.insert(bundle.disease, bundle);
    }

    pub fn get(&self, disease: Disease) -> Option<&TrainedModelBundle> {
        self.bundles.get(&disease)
    }

    pub fn diseases(&self) -> Vec<Disease> {
        self.bundles.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrainedModelBundle> {
        self.bundles.values()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    directory: PathBuf,
    prefix: String,
}

impl ModelStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.to_string(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.model_dir.clone(), &config.model_prefix)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, disease: Disease) -> PathBuf {
        self.directory
            .join(format!("{}_{}.{BUNDLE_EXTENSION}", self.prefix, disease.id()))
    }

    /// Writes the bundle to its disease's file, replacing any earlier save.
    /// The data goes to a sibling temporary file that is renamed into place.
    pub fn save(&self, bundle: &TrainedModelBundle) -> Result<PathBuf, StoreError> {
        let path = self.path_for(bundle.disease);
        let io_error = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.directory).map_err(io_error)?;

        let staging = path.with_extension("gz.partial");
        let file = fs::File::create(&staging).map_err(io_error)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        if let Err(e) = serde_json::to_writer(&mut encoder, bundle) {
            let cleanup = fs::remove_file(&staging);
            if let Err(c) = cleanup {
                warn!("Could not remove '{}': {c}", staging.display());
            }
            return Err(StoreError::Serialize(e));
        }
        let mut writer = encoder.finish().map_err(io_error)?;
        writer.flush().map_err(io_error)?;
        drop(writer);
        fs::rename(&staging, &path).map_err(io_error)?;

        info!("Saved {} model to {}", bundle.disease, path.display());
        Ok(path)
    }

    pub fn load(&self, disease: Disease) -> Result<TrainedModelBundle, StoreError> {
        Self::load_path(&self.path_for(disease), disease)
    }

    /// Loads a bundle from an explicit path. A missing file is
    /// [`StoreError::ModelNotFound`]; anything present but unreadable, not
    /// gzip JSON, of another format version or for another disease is
    /// [`StoreError::ModelCorrupt`].
    pub fn load_path(path: &Path, disease: Disease) -> Result<TrainedModelBundle, StoreError> {
        let corrupt = |reason: String| StoreError::ModelCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ModelNotFound {
                    disease,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(corrupt(e.to_string())),
        };

        let decoder = GzDecoder::new(BufReader::new(file));
        let bundle: TrainedModelBundle =
            serde_json::from_reader(BufReader::new(decoder)).map_err(|e| corrupt(e.to_string()))?;

        if bundle.format_version != BUNDLE_FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} is not the supported version {BUNDLE_FORMAT_VERSION}",
                bundle.format_version
            )));
        }
        if bundle.disease != disease {
            return Err(corrupt(format!(
                "file holds a {} model, expected {disease}",
                bundle.disease
            )));
        }
        Ok(bundle)
    }

    /// Loads every requested disease, collecting failures per disease instead
    /// of stopping at the first.
    pub fn load_registry(
        &self,
        diseases: &[Disease],
    ) -> (ModelRegistry, BTreeMap<Disease, StoreError>) {
        let mut registry = ModelRegistry::new();
        let mut failures = BTreeMap::new();
        for &disease in diseases {
            match self.load(disease) {
                Ok(bundle) => registry.insert(bundle),
                Err(e) => {
                    warn!("Could not load {disease} model: {e}");
                    failures.insert(disease, e);
                }
            }
        }
        (registry, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_the_prefix_convention() {
        let store = ModelStore::new("/tmp/models", "enhanced_chronic_disease_model");
        assert_eq!(
            store.path_for(Disease::HeartDisease),
            PathBuf::from("/tmp/models/enhanced_chronic_disease_model_heart_disease.json.gz")
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        assert!(matches!(
            store.load(Disease::Stroke),
            Err(StoreError::ModelNotFound {
                disease: Disease::Stroke,
                ..
            })
        ));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        fs::write(store.path_for(Disease::Copd), b"definitely not gzip").unwrap();
        assert!(matches!(
            store.load(Disease::Copd),
            Err(StoreError::ModelCorrupt { .. })
        ));
    }

    #[test]
    fn gzip_of_the_wrong_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        let path = store.path_for(Disease::Diabetes);
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        encoder.write_all(br#"{"format_version": 1}"#).unwrap();
        encoder.finish().unwrap();
        assert!(matches!(
            store.load(Disease::Diabetes),
            Err(StoreError::ModelCorrupt { .. })
        ));
    }

    #[test]
    fn registry_collects_per_disease_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        let (registry, failures) = store.load_registry(&[Disease::Diabetes, Disease::Stroke]);
        assert!(registry.is_empty());
        assert_eq!(failures.len(), 2);
    }
}
