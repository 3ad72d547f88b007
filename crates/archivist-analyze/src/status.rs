//! Read-only archive status.

use std::path::PathBuf;

use archivist_core::ArchiveError;
use archivist_store::{Archive, MetadataStore, StoreCounts};
use serde::Serialize;
use tracing::info;

/// Aggregate state of an archive.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Archive root.
    pub root: PathBuf,
    /// Store location.
    pub store_path: PathBuf,
    /// Entry counts and sizes.
    #[serde(flatten)]
    pub counts: StoreCounts,
    /// Whether the path index exists.
    pub path_index: bool,
}

impl StatusReport {
    /// Collect status for an open archive. Works on an empty store.
    pub fn collect(archive: &Archive) -> Result<Self, ArchiveError> {
        let store = archive.store();
        Ok(Self {
            root: archive.config().root.clone(),
            store_path: archive.config().resolved_store_path(),
            counts: store.counts()?,
            path_index: store.has_path_index()?,
        })
    }

    /// Entries verified at least once.
    pub fn verified(&self) -> u64 {
        self.counts.total_entries - self.counts.unverified
    }
}

/// Result of offering the path index migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathIndexState {
    /// The index already existed.
    Present,
    /// The index was created now.
    Created,
    /// The operator declined; nothing changed.
    Declined,
}

/// Create the path index if it is missing and `confirm` agrees.
///
/// `confirm` is only called when the index is missing.
pub fn offer_path_index(
    store: &MetadataStore,
    confirm: impl FnOnce() -> bool,
) -> Result<PathIndexState, ArchiveError> {
    if store.has_path_index()? {
        return Ok(PathIndexState::Present);
    }
    if !confirm() {
        return Ok(PathIndexState::Declined);
    }
    store.create_path_index()?;
    info!("created path index");
    Ok(PathIndexState::Created)
}
