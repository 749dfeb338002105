//! Error types for the feasibility gate.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Top-level error enum for the feasibility gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Manifest error in {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn input(message: impl Into<String>) -> Self {
        GateError::Input(message.into())
    }

    pub fn manifest(path: &Path, message: impl Into<String>) -> Self {
        GateError::Manifest {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether this error rejects the evaluation's inputs outright.
    pub fn is_input(&self) -> bool {
        matches!(self, GateError::Input(_))
    }
}

/// A single manifest that failed to load; the rest of the corpus is unaffected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManifestLoadError {
    pub path: String,
    pub message: String,
}

impl ManifestLoadError {
    pub fn new(path: &Path, err: &GateError) -> Self {
        let message = match err {
            GateError::Manifest { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            path: path.display().to_string(),
            message,
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;
