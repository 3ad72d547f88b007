//! Scoped archive handle: configuration plus an open store.
//!
//! Every command acquires an [`Archive`] once and passes it into the
//! pipeline it runs; the store connection is released when the handle drops,
//! on every exit path.

use archivist_core::{ArchiveConfig, ArchiveError, policy};
use tracing::info;

use crate::store::MetadataStore;

/// Result of [`Archive::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new store was created.
    Created,
    /// A store already existed and was left untouched.
    AlreadyInitialized,
}

/// An archive root with its metadata store open.
pub struct Archive {
    config: ArchiveConfig,
    store: MetadataStore,
}

impl Archive {
    /// Initialize an archive, creating the store if needed.
    ///
    /// Fails before creating anything if the root holds hidden entries other
    /// than the reserved directory.
    pub fn init(config: ArchiveConfig) -> Result<(Self, InitOutcome), ArchiveError> {
        Self::check_root(&config)?;

        let hidden = policy::hidden_root_entries(&config.root, &config.reserved_dir)
            .map_err(|e| ArchiveError::io(&config.root, e))?;
        if !hidden.is_empty() {
            return Err(ArchiveError::HiddenEntryAtRoot { names: hidden });
        }

        let store_path = config.resolved_store_path();
        if store_path.exists() {
            let store = MetadataStore::open(&store_path)?;
            return Ok((Self { config, store }, InitOutcome::AlreadyInitialized));
        }

        let store = MetadataStore::create(&store_path)?;
        info!(root = %config.root.display(), store = %store_path.display(), "initialized archive");
        Ok((Self { config, store }, InitOutcome::Created))
    }

    /// Open an initialized archive.
    pub fn open(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        Self::check_root(&config)?;

        let store_path = config.resolved_store_path();
        if !store_path.is_file() {
            return Err(ArchiveError::NotInitialized { store: store_path });
        }
        let store = MetadataStore::open(&store_path)?;
        Ok(Self { config, store })
    }

    /// Open an archive, creating its store when it does not exist yet.
    pub fn open_or_create(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        Self::check_root(&config)?;

        let store_path = config.resolved_store_path();
        let store = if store_path.is_file() {
            MetadataStore::open(&store_path)?
        } else {
            MetadataStore::create(&store_path)?
        };
        Ok(Self { config, store })
    }

    /// Wrap an already-open store (tests and embedding).
    pub fn with_store(config: ArchiveConfig, store: MetadataStore) -> Self {
        Self { config, store }
    }

    fn check_root(config: &ArchiveConfig) -> Result<(), ArchiveError> {
        if !config.root.is_dir() {
            return Err(ArchiveError::NotADirectory {
                path: config.root.clone(),
            });
        }
        Ok(())
    }

    /// Archive configuration.
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// The metadata store.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// The metadata store, mutably.
    pub fn store_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    /// Borrow configuration and store at once.
    pub fn parts_mut(&mut self) -> (&ArchiveConfig, &mut MetadataStore) {
        (&self.config, &mut self.store)
    }
}
