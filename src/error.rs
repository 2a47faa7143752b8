//! Error types for codetrace.
//!
//! One enum covers every failure the library surfaces. File-scoped
//! failures (`Parse`) are caught by the pipeline and recorded against the
//! file instead of aborting a batch; store failures propagate and roll back
//! the enclosing transaction.

use thiserror::Error;

/// All errors produced by the codetrace library.
#[derive(Debug, Error)]
pub enum CodeTraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("ambiguous resolution for `{key}`: {} candidates ({})", candidates.len(), candidates.join(", "))]
    ResolutionAmbiguous { key: String, candidates: Vec<String> },

    #[error("store write conflict persisted after {attempts} attempts")]
    TransactionConflict { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CodeTraceError {
    /// Build a [`CodeTraceError::Parse`] for `file`.
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    /// True when the underlying SQLite error is a lock/busy condition that a
    /// serialized retry can clear.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::TransactionConflict { .. } => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CodeTraceError>;
