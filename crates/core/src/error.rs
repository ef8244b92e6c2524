use std::path::PathBuf;

use thiserror::Error;

/// Error type for audit operations that can abort a run.
///
/// Per-binary failures are never surfaced through this type; stages log them
/// and continue with sentinel values instead.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Filesystem error tied to a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build log did not yield the information a run needs.
    #[error("Build log error: {0}")]
    BuildLog(String),

    /// The module manifest (module-info.json) is missing or unreadable.
    #[error("Module manifest error at {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// A configuration file was missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage that requires fingerprints was handed a record without one.
    #[error("Binary {0} has not been fingerprinted")]
    Unfingerprinted(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AuditError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Convenience result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
