//! Versioned Model Registry

use crate::StorageError;
use inference_engine::ModelArtifact;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use trainer::TrainingMetrics;
use tracing::{debug, info, warn};

/// Directory of immutable `model_v{N}.json` / `metrics_v{N}.json` pairs
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

fn metrics_file_name(version: u32) -> String {
    format!("metrics_v{version}.json")
}

fn parse_model_version(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("model_v")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl ModelRegistry {
    /// Open a registry, creating the directory when missing
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Model registry opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version numbers of every `model_v{N}.json`, ascending
    fn model_files(&self) -> Result<Vec<u32>, StorageError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(version) = entry.file_name().to_str().and_then(parse_model_version) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Published versions, ascending. A version counts only once both its
    /// model and its metrics file are present.
    pub fn versions(&self) -> Result<Vec<u32>, StorageError> {
        let mut versions = self.model_files()?;
        versions.retain(|&v| self.dir.join(metrics_file_name(v)).is_file());
        Ok(versions)
    }

    pub fn latest_version(&self) -> Result<Option<u32>, StorageError> {
        Ok(self.versions()?.last().copied())
    }

    /// Version number the next training run should publish under
    pub fn next_version(&self) -> Result<u32, StorageError> {
        Ok(self.model_files()?.last().map_or(1, |v| v + 1))
    }

    /// Publish a model and its metrics. Never replaces an existing version.
    ///
    /// The model file is the commit point: metrics are written first and
    /// removed again when the model cannot be persisted.
    pub fn publish(
        &self,
        artifact: &ModelArtifact,
        metrics: &TrainingMetrics,
    ) -> Result<PathBuf, StorageError> {
        let version = artifact.version;
        let model_path = self.dir.join(ModelArtifact::file_name(version));
        if model_path.exists() {
            return Err(StorageError::VersionExists(version));
        }

        // A metrics file without a model is left over from a failed publish
        let metrics_path = self.dir.join(metrics_file_name(version));
        self.temp_file_with(metrics)?
            .persist(&metrics_path)
            .map_err(|e| StorageError::Io(e.error))?;

        let persisted = self
            .temp_file_with(artifact)
            .and_then(|file| {
                file.persist_noclobber(&model_path).map_err(|e| {
                    if e.error.kind() == ErrorKind::AlreadyExists {
                        StorageError::VersionExists(version)
                    } else {
                        StorageError::Io(e.error)
                    }
                })
            });
        if let Err(e) = persisted {
            if let Err(cleanup) = fs::remove_file(&metrics_path) {
                warn!(version, error = %cleanup, "Failed to remove metrics of unpublished model");
            }
            return Err(e);
        }

        info!(version, path = %model_path.display(), threshold = artifact.threshold, "Model published");
        Ok(model_path)
    }

    fn temp_file_with<T: Serialize>(&self, value: &T) -> Result<NamedTempFile, StorageError> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        Ok(file)
    }

    pub fn load(&self, version: u32) -> Result<ModelArtifact, StorageError> {
        let path = self.dir.join(ModelArtifact::file_name(version));
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_latest(&self) -> Result<ModelArtifact, StorageError> {
        let version = self
            .latest_version()?
            .ok_or_else(|| StorageError::NotFound(format!("no model in {}", self.dir.display())))?;
        self.load(version)
    }

    pub fn load_metrics(&self, version: u32) -> Result<TrainingMetrics, StorageError> {
        let path = self.dir.join(metrics_file_name(version));
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
