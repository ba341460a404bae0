//! Reconstruction settings shared by the library entry points and the binary.

use crate::cache::DEFAULT_CAPACITY_BYTES;
use crate::enums::Interpolation;
use crate::transfer_function::TransferFunctionPreset;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_capacity_bytes: u64,
    /// Slices on each side of the central slice collapsed into a MIP.
    pub slab_half_size: usize,
    /// Name of the transfer function preset.
    pub preset: String,
    pub interpolation: Interpolation,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            slab_half_size: 0,
            preset: "Bone".to_owned(),
            interpolation: Interpolation::Bilinear,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Reads a JSON array of transfer function presets.
pub fn load_presets(path: impl AsRef<Path>) -> Result<Vec<TransferFunctionPreset>, ConfigError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
