//! Archive tree walking and store reconciliation for archivist.
//!
//! # Overview
//!
//! `archivist-scan` walks an archive root with jwalk and rebuilds the
//! metadata store from what it finds:
//!
//! - **Deterministic walk order** (depth-first, names sorted)
//! - **Parallel hashing** of each commit chunk via rayon
//! - **Resumable** runs; an interrupted scan keeps every committed chunk
//! - **Progress updates** via broadcast channels
//!
//! # Example
//!
//! ```rust,no_run
//! use archivist_core::ArchiveConfig;
//! use archivist_scan::{Reconciler, ScanMode};
//! use archivist_store::Archive;
//!
//! let mut archive = Archive::open(ArchiveConfig::new("/path/to/archive")).unwrap();
//! let report = Reconciler::new().run(&mut archive, ScanMode::Resume).unwrap();
//!
//! println!("Indexed {} files ({} already known)", report.indexed, report.skipped);
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! use archivist_scan::Reconciler;
//!
//! let reconciler = Reconciler::new();
//! let mut progress_rx = reconciler.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(progress) = progress_rx.recv().await {
//!         println!("Indexed {} of {}", progress.indexed, progress.candidates);
//!     }
//! });
//! ```

mod progress;
mod reconcile;
mod walker;

pub use progress::{ScanPhase, ScanProgress};
pub use reconcile::{Reconciler, ScanMode, ScanReport};
pub use walker::{Candidate, TreeWalker, WalkOptions, WalkOutcome};
