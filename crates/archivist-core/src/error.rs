//! Error types for archive operations.
//!
//! [`ArchiveError`] aborts a whole command. [`EntryError`] describes a single
//! candidate or entry that could not be processed; it is collected and
//! reported while processing continues.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that terminate an archive command.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No store exists at the resolved location.
    #[error("Archive not initialized (no store at {store}). Run `archivist init` first")]
    NotInitialized { store: PathBuf },

    /// The archive root contains hidden entries.
    #[error("Hidden entries found in archive root: {}", names.join(", "))]
    HiddenEntryAtRoot { names: Vec<String> },

    /// The destination names or passes through the reserved storage area.
    #[error("Cannot add files to reserved directory {reserved} (destination: {destination:?})")]
    ReservedDestination {
        destination: String,
        reserved: String,
    },

    /// The destination is hidden or escapes the archive root.
    #[error("Invalid destination subdirectory {destination:?}: {reason}")]
    InvalidDestination {
        destination: String,
        reason: String,
    },

    /// The add source does not exist.
    #[error("Source does not exist: {path}")]
    SourceNotFound { path: PathBuf },

    /// Archive root is not a directory.
    #[error("Archive root is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A rebuild was requested over a store that already holds entries.
    #[error(
        "Store already contains data ({entries} entries). Use --continue to resume or --reset to rebuild"
    )]
    StoreNotEmpty { entries: u64 },

    /// The durable store rejected an operation.
    #[error("Metadata store error: {source}")]
    Store {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error outside any single entry.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Operation was cancelled.
    #[error("Operation interrupted")]
    Interrupted,
}

impl ArchiveError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a store failure.
    pub fn store(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store {
            source: Box::new(source),
        }
    }

    /// Check if this is a precondition failure (nothing was mutated).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized { .. }
                | Self::HiddenEntryAtRoot { .. }
                | Self::ReservedDestination { .. }
                | Self::InvalidDestination { .. }
                | Self::SourceNotFound { .. }
                | Self::NotADirectory { .. }
        )
    }

    /// Check if this is a conflict with existing data.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreNotEmpty { .. })
    }
}

/// Kind of per-entry failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryErrorKind {
    /// Could not read the candidate.
    Unreadable,
    /// The candidate disappeared while being processed.
    Vanished,
    /// Something already exists at the destination.
    DestinationExists,
    /// The computed destination passes through the reserved area.
    ReservedPath,
    /// Copying into the archive failed.
    CopyFailed,
    /// The source bytes changed between identification and copy.
    SourceChanged,
    /// The copy succeeded but the store write failed.
    Unindexed,
    /// The directory walk reported an error.
    Walk,
    /// The name cannot be stored as a UTF-8 archive path.
    UnsupportedName,
}

/// A failure confined to one candidate or entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryError {
    /// Path the failure refers to.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of failure.
    pub kind: EntryErrorKind,
}

impl EntryError {
    /// Create a new entry error.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: EntryErrorKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Classify an I/O error hit while reading a candidate.
    pub fn read(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => EntryErrorKind::Vanished,
            _ => EntryErrorKind::Unreadable,
        };
        Self::new(path, format!("Read error: {error}"), kind)
    }

    /// Create a destination-already-exists error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Destination already exists: {}", path.display()),
            path,
            kind: EntryErrorKind::DestinationExists,
        }
    }

    /// Create an error for a path whose name is not valid UTF-8.
    pub fn unsupported_name(path: impl Into<PathBuf>) -> Self {
        Self::new(
            path,
            "File name is not valid UTF-8 and cannot be recorded",
            EntryErrorKind::UnsupportedName,
        )
    }

    /// Create an error for a file that reached the archive but not the store.
    pub fn unindexed(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self {
            message: format!(
                "Copied to {} but not recorded ({error}); run `archivist scan --continue` to index it",
                path.display()
            ),
            path,
            kind: EntryErrorKind::Unindexed,
        }
    }
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
