use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure tag carried by [`crate::Outcome::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model resource missing or corrupt.
    ModelLoadFailed,
    /// The scoring call itself failed.
    InferenceFailed,
    /// Scoring succeeded but produced nothing usable as a classification.
    UnexpectedResultShape,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ModelLoadFailed => "model_load_failed",
            ErrorKind::InferenceFailed => "inference_failed",
            ErrorKind::UnexpectedResultShape => "unexpected_result_shape",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by model loading and scoring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("{0}")]
    Inference(String),
    #[error("unexpected result shape: {0}")]
    UnexpectedShape(String),
}

impl ClassifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifyError::ModelLoad(_) => ErrorKind::ModelLoadFailed,
            ClassifyError::Inference(_) => ErrorKind::InferenceFailed,
            ClassifyError::UnexpectedShape(_) => ErrorKind::UnexpectedResultShape,
        }
    }

    /// The bare diagnostic, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ClassifyError::ModelLoad(m)
            | ClassifyError::Inference(m)
            | ClassifyError::UnexpectedShape(m) => m,
        }
    }

    pub fn model_load(msg: impl Into<String>) -> Self {
        ClassifyError::ModelLoad(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        ClassifyError::Inference(msg.into())
    }

    pub fn unexpected_shape(msg: impl Into<String>) -> Self {
        ClassifyError::UnexpectedShape(msg.into())
    }
}

/// Setup problems that happen before any request exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("worker pool could not be started: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
