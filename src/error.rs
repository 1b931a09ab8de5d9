//! Error types for the index and search core.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoderagErr>;

/// Errors surfaced by the indexing and retrieval core.
///
/// Unknown languages and parse failures are not errors: the chunker falls
/// back to character windows and records the condition in chunk metadata.
#[derive(Debug, Error)]
pub enum CoderagErr {
    /// SQLite operation failed.
    #[error("sqlite error at {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    /// A schema migration failed. Fatal: the process must not accept writes.
    #[error("migration failed: {cause}")]
    MigrationFailed { cause: String },

    /// Invalid configuration value.
    #[error("invalid config {field}: {cause}")]
    Config { field: String, cause: String },

    /// Filesystem I/O failure.
    #[error("io error at {path}: {cause}")]
    Io { path: PathBuf, cause: String },

    /// Embedding provider call failed.
    #[error("embedding failed: {cause}")]
    EmbeddingFailed { cause: String },

    /// Store stayed busy after retries were exhausted.
    #[error("store busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// Operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Malformed search request.
    #[error("invalid request: {cause}")]
    InvalidRequest { cause: String },
}

impl CoderagErr {
    /// Wrap a rusqlite error with the database path for context.
    pub fn sqlite(path: &std::path::Path, err: rusqlite::Error) -> Self {
        Self::Sqlite {
            path: path.to_path_buf(),
            cause: err.to_string(),
        }
    }

    /// Wrap a std::io error with the offending path.
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            cause: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CoderagErr {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite {
            path: PathBuf::new(),
            cause: err.to_string(),
        }
    }
}
