//! Error types for the metadata store.

use std::path::PathBuf;

use archivist_core::ArchiveError;
use thiserror::Error;

/// Errors surfaced by the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected an operation.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Could not prepare the store location.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A size does not fit the store's integer column.
    #[error("Size {0} exceeds the store's integer range")]
    SizeOutOfRange(u64),

    /// The store was written by a newer schema.
    #[error("Unsupported schema version {found} (this build understands up to {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },
}

impl StoreError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for ArchiveError {
    fn from(err: StoreError) -> Self {
        ArchiveError::store(err)
    }
}

/// Result alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
