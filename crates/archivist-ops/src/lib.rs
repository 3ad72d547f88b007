//! Ingest pipeline for archivist.
//!
//! This crate adds files and symlinks to an archive: every candidate is
//! identified, checked against the metadata store for existing copies,
//! passed through the duplicate policy, copied into place without ever
//! overwriting, and recorded. Interactive confirmation is an injected
//! [`DuplicatePrompt`], so the pipeline runs unchanged in tests.

mod copy;
mod duplicate;
mod ingest;
mod progress;

pub use copy::{CopyError, copy_entry};
pub use duplicate::{DuplicatePolicy, DuplicatePrompt, ExistingCopies, SHOWN_COPIES, is_affirmative};
pub use ingest::{AddedEntry, Ingest, IngestReport, IngestRequest, SkippedDuplicate};
pub use progress::IngestProgress;

/// Default channel buffer size for ingest progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
