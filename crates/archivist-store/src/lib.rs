//! Durable metadata store for archivist.
//!
//! The store records every archived entry together with a fingerprint index
//! row used for duplicate detection. It is backed by SQLite in WAL mode;
//! single entries are committed atomically and bulk indexing commits in
//! batches, so an interrupted run loses at most its uncommitted batch.
//!
//! ```rust,no_run
//! use archivist_core::ArchiveConfig;
//! use archivist_store::Archive;
//!
//! let (archive, _) = Archive::init(ArchiveConfig::new("/srv/archive")).unwrap();
//! let counts = archive.store().counts().unwrap();
//! println!("{} entries", counts.total_entries);
//! ```

mod archive;
mod error;
mod store;

pub use archive::{Archive, InitOutcome};
pub use error::{Result, StoreError};
pub use store::{
    Batch, EntryIter, IdentityGroup, MetadataStore, PATH_INDEX_NAME, SCHEMA_VERSION, StoreCounts,
};
