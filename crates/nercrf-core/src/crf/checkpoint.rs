//! # Checkpoints
//!
//! A checkpoint is a directory holding `crf.json` (label list and CRF
//! configuration) and `transitions.safetensors` (the raw transition
//! parameter). Barriers are rebuilt from the label space on load, so a
//! tampered barrier entry on disk has no effect.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CrfConfig;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{CrfError, Result};
use crate::labels::LabelSpace;

/// Metadata file name inside a checkpoint directory.
pub const METADATA_FILE: &str = "crf.json";
/// Tensor file name inside a checkpoint directory.
pub const TENSOR_FILE: &str = "transitions.safetensors";
/// Tensor key of the transition parameter.
pub const TRANSITIONS_KEY: &str = "crf.transitions";

#[derive(Serialize, Deserialize)]
struct Metadata {
    labels: LabelSpace,
    #[serde(default)]
    config: CrfConfig,
}

/// Everything needed to rebuild a trained CRF layer.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub labels: LabelSpace,
    pub config: CrfConfig,
    pub transitions: TransitionMatrix,
}

impl Checkpoint {
    /// Write the checkpoint into `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let metadata = Metadata {
            labels: self.labels.clone(),
            config: self.config.clone(),
        };
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;

        let tensors = HashMap::from([(
            TRANSITIONS_KEY.to_string(),
            self.transitions.var().as_tensor().clone(),
        )]);
        candle_core::safetensors::save(&tensors, dir.join(TENSOR_FILE))?;

        debug!(path = %dir.display(), num_labels = self.labels.len(), "saved checkpoint");
        Ok(())
    }

    /// Read a checkpoint from `dir` onto `device`.
    pub fn load(dir: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let metadata: Metadata = serde_json::from_slice(&fs::read(dir.join(METADATA_FILE))?)?;

        let mut tensors = candle_core::safetensors::load(dir.join(TENSOR_FILE), device)?;
        let values = tensors
            .remove(TRANSITIONS_KEY)
            .ok_or_else(|| CrfError::Checkpoint(format!("missing tensor {TRANSITIONS_KEY:?}")))?;

        let dim = metadata.labels.transition_dim();
        if values.dims() != [dim, dim] {
            return Err(CrfError::Checkpoint(format!(
                "{TRANSITIONS_KEY:?} has shape {:?}, expected [{dim}, {dim}] for {} labels",
                values.dims(),
                metadata.labels.len()
            )));
        }

        let transitions =
            TransitionMatrix::from_tensor(&metadata.labels, metadata.config.constraints, values)?;
        debug!(path = %dir.display(), num_labels = metadata.labels.len(), "loaded checkpoint");

        Ok(Self {
            labels: metadata.labels,
            config: metadata.config,
            transitions,
        })
    }
}
