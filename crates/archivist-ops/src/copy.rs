//! Type-preserving, no-clobber copies into the archive.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use archivist_core::identity::{HashingReader, fingerprint_link_target};
use archivist_core::{EntryError, EntryErrorKind, EntryKind, Fingerprint, Identity};
use thiserror::Error;
use tracing::debug;

/// Prefix of in-flight temporary files in destination directories.
const TEMP_PREFIX: &str = ".archivist-partial-";

/// Why a single copy failed.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Something already exists at the destination.
    #[error("Destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    /// The source no longer has the identity computed before the copy.
    #[error("Source changed while copying (expected {expected}, read {actual})")]
    SourceChanged {
        expected: Fingerprint,
        actual: Fingerprint,
    },

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CopyError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    /// Convert into a per-entry error for `source`.
    pub fn into_entry_error(self, source: &Path) -> EntryError {
        match self {
            Self::DestinationExists { path } => EntryError::destination_exists(path),
            Self::SourceChanged { .. } => {
                EntryError::new(source, self.to_string(), EntryErrorKind::SourceChanged)
            }
            Self::Io { source: ref e, .. } if e.kind() == io::ErrorKind::NotFound => {
                EntryError::new(source, self.to_string(), EntryErrorKind::Vanished)
            }
            Self::Io { .. } => EntryError::new(source, self.to_string(), EntryErrorKind::CopyFailed),
        }
    }
}

/// Copy `source` to `dest`, preserving its type.
///
/// A regular file is streamed into a temporary file beside `dest`, checked
/// against `expected`, synced, and renamed into place without replacing
/// anything. A symlink is recreated with the same target string. On any
/// failure nothing is left at `dest`.
///
/// Returns the number of bytes copied.
pub fn copy_entry(source: &Path, dest: &Path, expected: &Identity) -> Result<u64, CopyError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(CopyError::io("Failed to create directory"))?;
    }

    match expected.kind {
        EntryKind::File => copy_file(source, dest, expected),
        EntryKind::Symlink => copy_symlink(source, dest, expected).map(|()| 0),
    }
}

fn copy_file(source: &Path, dest: &Path, expected: &Identity) -> Result<u64, CopyError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let metadata = fs::metadata(source).map_err(CopyError::io("Failed to read metadata"))?;

    let mut reader = HashingReader::new(File::open(source).map_err(CopyError::io("Failed to open source"))?);
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(CopyError::io("Failed to create temporary file"))?;

    io::copy(&mut reader, temp.as_file_mut()).map_err(CopyError::io("Failed to copy"))?;
    let (size, actual) = reader.finish();
    if !expected.matches(size, &actual) {
        return Err(CopyError::SourceChanged {
            expected: expected.fingerprint,
            actual,
        });
    }

    let file = temp.as_file();
    file.set_permissions(metadata.permissions())
        .map_err(CopyError::io("Failed to set permissions"))?;
    if let Ok(modified) = metadata.modified() {
        file.set_modified(modified)
            .map_err(CopyError::io("Failed to set modification time"))?;
    }
    file.sync_all().map_err(CopyError::io("Failed to sync"))?;

    temp.persist_noclobber(dest).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            CopyError::DestinationExists {
                path: dest.to_path_buf(),
            }
        } else {
            CopyError::Io {
                context: "Failed to move into place",
                source: e.error,
            }
        }
    })?;

    debug!(source = %source.display(), dest = %dest.display(), size, "copied file");
    Ok(size)
}

fn copy_symlink(source: &Path, dest: &Path, expected: &Identity) -> Result<(), CopyError> {
    let target = fs::read_link(source).map_err(CopyError::io("Failed to read link"))?;
    let actual = fingerprint_link_target(&target);
    if actual != expected.fingerprint {
        return Err(CopyError::SourceChanged {
            expected: expected.fingerprint,
            actual,
        });
    }

    create_symlink(&target, dest).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            CopyError::DestinationExists {
                path: dest.to_path_buf(),
            }
        } else {
            CopyError::Io {
                context: "Failed to create symlink",
                source: e,
            }
        }
    })?;

    debug!(source = %source.display(), dest = %dest.display(), target = %target.display(), "copied symlink");
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks can only be archived on unix",
    ))
}
