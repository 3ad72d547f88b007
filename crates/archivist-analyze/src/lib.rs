//! Read-side analysis for archivist.
//!
//! - **Verification** - Check every recorded entry against the disk
//! - **Status** - Aggregate counts from the metadata store
//! - **Duplicate report** - Entries grouped by shared identity
//!
//! # Verification
//!
//! Entries are checked in id order; findings never stop the run:
//!
//! ```rust,no_run
//! use archivist_analyze::Verifier;
//! use archivist_core::ArchiveConfig;
//! use archivist_store::Archive;
//!
//! let archive = Archive::open(ArchiveConfig::new("/path/to/archive")).unwrap();
//! let report = Verifier::new().run(&archive).unwrap();
//!
//! for finding in &report.findings {
//!     println!("{finding}");
//! }
//! println!("{} issues in {} entries", report.issue_count(), report.checked);
//! ```
//!
//! # Duplicate Report
//!
//! ```rust,no_run
//! use archivist_analyze::{DuplicateConfig, DuplicateFinder};
//! use archivist_core::ArchiveConfig;
//! use archivist_store::Archive;
//!
//! let archive = Archive::open(ArchiveConfig::new("/path/to/archive")).unwrap();
//! let config = DuplicateConfig::builder().max_groups(10usize).build().unwrap();
//! let report = DuplicateFinder::with_config(config)
//!     .find_duplicates(archive.store())
//!     .unwrap();
//!
//! println!("Wasted space: {} bytes", report.total_wasted_space);
//! ```

mod duplicates;
mod status;
mod verify;

pub use duplicates::{DuplicateConfig, DuplicateConfigBuilder, DuplicateFinder, DuplicateGroup, DuplicateReport};
pub use status::{PathIndexState, StatusReport, offer_path_index};
pub use verify::{
    Finding, FindingKind, Verifier, VerifyConfig, VerifyConfigBuilder, VerifyProgress, VerifyReport,
    check_entry,
};
