use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("Compression failed: {0:#}")]
    Compression(anyhow::Error),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Index was built with embedder '{stored}' but '{current}' is loaded")]
    ModelMismatch { stored: String, current: String },

    #[error("Index is misaligned: {0}")]
    Misaligned(String),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Timeouts are recoverable at the call sites that wrap model invocations.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
