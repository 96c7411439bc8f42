//! TOML configuration for the model backend and worker pool.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub executor: ExecutorConfig,
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

/// Configuration for the dense linear classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub weights_path: PathBuf,
    pub labels_path: PathBuf,
    /// Side length the input is resized to before scoring.
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Number of ranked labels kept per image.
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "linear-probe".to_string(),
            weights_path: PathBuf::from("models/classifier.safetensors"),
            labels_path: PathBuf::from("models/labels.txt"),
            input_size: 32,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 0 lets rayon pick one thread per core.
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name: "classify-worker".to_string(),
        }
    }
}
