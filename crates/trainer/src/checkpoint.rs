//! Checkpoint persistence
//!
//! A checkpoint file is canonical JSON `{"checkpoint": .., "digest": ..}` where
//! `digest` is the BLAKE3 hex of the canonical checkpoint body. Saves go to a
//! temporary sibling that is renamed over the target, so a reader sees either
//! the previous blob or the new one.

use crate::canonical::{hash_canonical_hex, to_canonical_json};
use crate::device::ComputeDevice;
use crate::errors::{PipelineError, Result};
use crate::model::{NamedTensor, Regressor};
use crate::selection::SelectedFeatures;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FORMAT_VERSION: u32 = 1;

/// Parameter snapshot plus everything needed to predict from raw test rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub input_dim: usize,
    /// Width of the raw feature matrix the selection applies to
    pub source_width: usize,
    pub selected_features: Vec<usize>,
    pub tensors: Vec<NamedTensor>,
    /// Zero-based epoch that produced these parameters
    pub epoch: usize,
    /// Loss the stopping rule saw at `epoch`: validation loss, or training
    /// loss for runs without validation rows
    pub monitored_loss: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    checkpoint: Checkpoint,
    digest: String,
}

impl Checkpoint {
    pub fn capture(
        model: &Regressor,
        selection: &SelectedFeatures,
        epoch: usize,
        monitored_loss: f32,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            input_dim: model.input_dim(),
            source_width: selection.source_width(),
            selected_features: selection.indices().to_vec(),
            tensors: model.to_tensors(),
            epoch,
            monitored_loss: monitored_loss as f64,
        }
    }

    /// Rebuild the model and feature selection
    pub fn restore(&self, device: ComputeDevice) -> Result<(Regressor, SelectedFeatures)> {
        if self.selected_features.len() != self.input_dim {
            return Err(PipelineError::config(format!(
                "checkpoint selects {} features but the model takes {}",
                self.selected_features.len(),
                self.input_dim
            )));
        }
        let selection =
            SelectedFeatures::from_indices(self.selected_features.clone(), self.source_width)?;
        let model = Regressor::from_tensors(self.input_dim, &self.tensors, device)?;
        Ok((model, selection))
    }

    pub fn digest(&self) -> Result<String> {
        hash_canonical_hex(self).map_err(|e| PipelineError::config(e.to_string()))
    }
}

/// Location of the persisted best checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Atomically replace the stored checkpoint. Returns the digest.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<String> {
        let digest = hash_canonical_hex(checkpoint)
            .map_err(|e| PipelineError::checkpoint(&self.path, e.to_string()))?;
        let file = CheckpointFile {
            checkpoint: checkpoint.clone(),
            digest: digest.clone(),
        };
        let body = to_canonical_json(&file)
            .map_err(|e| PipelineError::checkpoint(&self.path, e.to_string()))?;

        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        tmp.write_all(body.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| PipelineError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), digest = %digest, "checkpoint written");
        Ok(digest)
    }

    /// Read and verify the stored checkpoint
    pub fn load(&self) -> Result<Checkpoint> {
        let body = std::fs::read_to_string(&self.path).map_err(|e| PipelineError::io(&self.path, e))?;
        let file: CheckpointFile = serde_json::from_str(&body)
            .map_err(|e| PipelineError::checkpoint(&self.path, format!("malformed: {}", e)))?;

        if file.checkpoint.format_version != FORMAT_VERSION {
            return Err(PipelineError::checkpoint(
                &self.path,
                format!(
                    "unsupported format version {} (expected {})",
                    file.checkpoint.format_version, FORMAT_VERSION
                ),
            ));
        }

        let digest = hash_canonical_hex(&file.checkpoint)
            .map_err(|e| PipelineError::checkpoint(&self.path, e.to_string()))?;
        if digest != file.digest {
            return Err(PipelineError::checkpoint(
                &self.path,
                format!("digest mismatch: stored {}, computed {}", file.digest, digest),
            ));
        }

        Ok(file.checkpoint)
    }

    /// Load, verify and rebuild the model in one step
    pub fn restore(&self, device: ComputeDevice) -> Result<(Regressor, SelectedFeatures, Checkpoint)> {
        let checkpoint = self.load()?;
        let (model, selection) = checkpoint
            .restore(device)
            .map_err(|e| PipelineError::checkpoint(&self.path, e.to_string()))?;
        Ok((model, selection, checkpoint))
    }
}
