//! Rebuilds the metadata store from what is actually on disk.

use std::collections::HashSet;
use std::time::Duration;

use archivist_core::{ArchiveConfig, ArchiveError, EntryError, Identity, identify};
use archivist_store::Archive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::{ProgressTracker, ScanPhase, ScanProgress};
use crate::walker::{Candidate, TreeWalker, WalkOptions};

/// How a reconciliation treats existing store contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Index everything; refuse if the store already holds entries.
    #[default]
    Rebuild,
    /// Index only paths not yet in the store, keeping existing entries.
    Resume,
    /// Clear the store, then index everything.
    Reset,
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Mode the reconciliation ran in.
    pub mode: ScanMode,
    /// Entries written.
    pub indexed: u64,
    /// Candidates skipped because their path was already indexed.
    pub skipped: u64,
    /// Candidates that could not be indexed.
    pub errors: Vec<EntryError>,
    /// Cancellation stopped the run; committed batches are kept.
    pub interrupted: bool,
    /// Wall time.
    pub duration: Duration,
}

impl ScanReport {
    fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            indexed: 0,
            skipped: 0,
            errors: Vec::new(),
            interrupted: false,
            duration: Duration::ZERO,
        }
    }

    /// Check if every candidate was handled without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.interrupted
    }
}

/// Walks an archive root and records every file and symlink found.
///
/// Candidates are hashed in parallel one commit-interval chunk at a time and
/// written in walk order, so entry ids follow the depth-first sorted walk.
/// Each chunk is committed as one transaction; a cancelled or failed run
/// keeps every chunk committed before it and can be resumed.
pub struct Reconciler {
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            progress_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Reconcile the archive's store with its root directory.
    pub fn run(&self, archive: &mut Archive, mode: ScanMode) -> Result<ScanReport, ArchiveError> {
        let mut report = ScanReport::new(mode);
        let mut tracker = ProgressTracker::new();
        let (config, store) = archive.parts_mut();

        let existing = match mode {
            ScanMode::Rebuild => {
                let entries = store.entry_count()?;
                if entries > 0 {
                    return Err(ArchiveError::StoreNotEmpty { entries });
                }
                HashSet::new()
            }
            ScanMode::Resume => store.entry_paths()?,
            ScanMode::Reset => {
                store.reset_all()?;
                HashSet::new()
            }
        };
        info!(root = %config.root.display(), ?mode, existing = existing.len(), "starting scan");

        let walk = TreeWalker::new(WalkOptions::for_archive(config)).walk(&config.root, &self.cancel);
        report.errors.extend(walk.errors);
        if walk.interrupted {
            report.interrupted = true;
            report.duration = tracker.elapsed();
            return Ok(report);
        }

        let store_files = store_file_paths(config);
        let total = walk.candidates.len() as u64;
        let pending: Vec<Candidate> = walk
            .candidates
            .into_iter()
            .filter(|c| !store_files.contains(&c.relative))
            .filter(|c| !existing.contains(&c.relative))
            .collect();
        report.skipped = total - pending.len() as u64;

        tracker.set_candidates(total, report.skipped);
        tracker.record_errors(report.errors.len() as u64);
        tracker.set_phase(ScanPhase::Indexing);
        let _ = self.progress_tx.send(tracker.snapshot());

        let pool = build_pool(config.hash_threads)?;

        for chunk in pending.chunks(config.commit_interval) {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let hashed: Vec<(&Candidate, std::io::Result<Identity>)> = match &pool {
                Some(pool) => pool.install(|| hash_chunk(chunk)),
                None => hash_chunk(chunk),
            };

            let mut batch = store.batch()?;
            let mut bytes = 0;
            let mut failed = 0;
            for (candidate, result) in hashed {
                match result {
                    Ok(identity) => {
                        batch.insert(&candidate.relative, identity.size, &identity.fingerprint)?;
                        bytes += identity.size;
                    }
                    Err(e) => {
                        warn!(path = %candidate.path.display(), error = %e, "cannot index");
                        report.errors.push(EntryError::read(&candidate.path, &e));
                        failed += 1;
                    }
                }
            }
            let committed = batch.commit()? as u64;
            report.indexed += committed;

            tracker.record_indexed(committed, bytes);
            tracker.record_errors(failed);
            if let Some(last) = chunk.last() {
                tracker.set_current_path(last.path.clone());
            }
            let _ = self.progress_tx.send(tracker.snapshot());
            debug!(committed, indexed = report.indexed, "committed scan chunk");
        }

        tracker.set_phase(ScanPhase::Finished);
        let _ = self.progress_tx.send(tracker.snapshot());

        report.duration = tracker.elapsed();
        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            errors = report.errors.len(),
            interrupted = report.interrupted,
            "scan finished"
        );
        Ok(report)
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_chunk(chunk: &[Candidate]) -> Vec<(&Candidate, std::io::Result<Identity>)> {
    chunk.par_iter().map(|c| (c, identify(&c.path))).collect()
}

fn build_pool(threads: usize) -> Result<Option<rayon::ThreadPool>, ArchiveError> {
    if threads == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map(Some)
        .map_err(|e| ArchiveError::InvalidConfig {
            message: format!("cannot start {threads} hashing threads: {e}"),
        })
}

/// Archive-relative paths of an external store living under the root.
fn store_file_paths(config: &ArchiveConfig) -> HashSet<String> {
    let Some(relative) = config.store_archive_path() else {
        return HashSet::new();
    };
    ["", "-wal", "-shm", "-journal"]
        .iter()
        .map(|suffix| format!("{relative}{suffix}"))
        .collect()
}
