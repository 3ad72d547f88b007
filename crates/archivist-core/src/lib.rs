//! Core types and policies for archivist.
//!
//! This crate provides the fundamental pieces shared by every archivist
//! component: archived entry types, content identity (fingerprinting),
//! name-pattern policies, archive configuration and the error taxonomy.

mod config;
mod entry;
mod error;
pub mod identity;
pub mod policy;

pub use config::{
    ArchiveConfig, ArchiveConfigBuilder, DEFAULT_COMMIT_INTERVAL, DEFAULT_RESERVED_DIR,
    DEFAULT_STORE_FILE,
};
pub use entry::{Entry, EntryId, EntryKind, Fingerprint, FingerprintParseError, Identity};
pub use error::{ArchiveError, EntryError, EntryErrorKind};
pub use identity::identify;
