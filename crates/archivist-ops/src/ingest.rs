//! The add pipeline: identify, consult the store, copy, record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use archivist_core::{
    ArchiveConfig, ArchiveError, EntryError, EntryErrorKind, EntryId, EntryKind, Identity,
    identify, policy,
};
use archivist_scan::{Candidate, TreeWalker, WalkOptions};
use archivist_store::{Archive, MetadataStore};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::copy::copy_entry;
use crate::duplicate::{Decision, DuplicatePolicy, DuplicatePrompt, ExistingCopies, decide};
use crate::progress::IngestProgress;
use crate::OPERATION_CHANNEL_SIZE;

/// What to add and where.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// File, symlink or directory to add.
    pub source: PathBuf,
    /// Archive subdirectory to place it under ("" for the root).
    pub destination: String,
    /// Duplicate handling.
    pub policy: DuplicatePolicy,
}

impl IngestRequest {
    /// Create a new request.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>, policy: DuplicatePolicy) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            policy,
        }
    }
}

/// A candidate that became a new entry.
#[derive(Debug, Clone, Serialize)]
pub struct AddedEntry {
    /// Assigned entry id.
    pub id: EntryId,
    /// Where the candidate came from.
    pub source: PathBuf,
    /// Archive-relative path of the new entry.
    pub path: String,
    /// Identity recorded for it.
    pub identity: Identity,
    /// Copies that already existed, when added as a duplicate.
    pub existing: Option<ExistingCopies>,
}

/// A duplicate candidate that was not added.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDuplicate {
    /// Where the candidate came from.
    pub source: PathBuf,
    /// Its identity.
    pub identity: Identity,
    /// Copies already in the archive.
    pub existing: ExistingCopies,
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// New entries, in processing order.
    pub added: Vec<AddedEntry>,
    /// Duplicates not added.
    pub skipped: Vec<SkippedDuplicate>,
    /// Candidates excluded by name policy.
    pub excluded: Vec<PathBuf>,
    /// Candidates that failed.
    pub errors: Vec<EntryError>,
    /// Cancellation stopped the run early.
    pub interrupted: bool,
    /// Wall time.
    pub duration: Duration,
}

impl IngestReport {
    /// Check if every candidate was handled without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.interrupted
    }

    /// Total bytes of the entries added.
    pub fn bytes_added(&self) -> u64 {
        self.added.iter().map(|a| a.identity.size).sum()
    }
}

enum Outcome {
    Added(AddedEntry),
    Skipped(SkippedDuplicate),
    Excluded,
    Failed(EntryError),
}

/// Adds files and symlinks to an archive.
///
/// Candidates are processed one at a time in depth-first walk order; each
/// accepted candidate is copied and then recorded before the next is looked
/// at, so duplicate lookups observe everything added earlier in the run.
pub struct Ingest {
    progress_tx: broadcast::Sender<IngestProgress>,
    cancel: CancellationToken,
}

impl Ingest {
    /// Create a new ingest pipeline.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(OPERATION_CHANNEL_SIZE);
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
    pub fn subscribe(&self) -> broadcast::Receiver<IngestProgress> {
        self.progress_tx.subscribe()
    }

    /// Add `request.source` under `request.destination`.
    ///
    /// Fails before touching anything if the destination is invalid or the
    /// source does not exist. Per-candidate failures are collected in the
    /// report; a store read failure aborts the run.
    pub fn run(
        &self,
        archive: &mut Archive,
        request: &IngestRequest,
        prompt: &mut dyn DuplicatePrompt,
    ) -> Result<IngestReport, ArchiveError> {
        let start = Instant::now();
        let (config, store) = archive.parts_mut();

        validate_destination(&request.destination, &config.reserved_dir)?;
        let destination = policy::canonical_destination(&request.destination);

        let metadata = fs::symlink_metadata(&request.source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::SourceNotFound {
                path: request.source.clone(),
            },
            _ => ArchiveError::io(&request.source, e),
        })?;

        let mut report = IngestReport::default();
        let candidates = if metadata.is_dir() {
            let walk = TreeWalker::new(WalkOptions::for_source()).walk(&request.source, &self.cancel);
            report.errors.extend(walk.errors);
            report.interrupted = walk.interrupted;
            walk.candidates
        } else {
            single_candidate(&request.source, &metadata, &mut report)
        };

        info!(
            source = %request.source.display(),
            destination = %destination,
            policy = %request.policy,
            candidates = candidates.len(),
            "starting add"
        );

        let mut progress = IngestProgress::new(candidates.len());
        for candidate in &candidates {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            progress.current_file = Some(candidate.path.clone());

            match ingest_one(config, store, &destination, request.policy, prompt, candidate)? {
                Outcome::Added(added) => {
                    progress.added += 1;
                    progress.bytes_copied += added.identity.size;
                    report.added.push(added);
                }
                Outcome::Skipped(skipped) => {
                    progress.skipped += 1;
                    report.skipped.push(skipped);
                }
                Outcome::Excluded => report.excluded.push(candidate.path.clone()),
                Outcome::Failed(err) => {
                    warn!(path = %err.path.display(), error = %err.message, "candidate not added");
                    progress.errors += 1;
                    report.errors.push(err);
                }
            }

            progress.processed += 1;
            progress.elapsed = start.elapsed();
            let _ = self.progress_tx.send(progress.clone());
        }

        report.duration = start.elapsed();
        info!(
            added = report.added.len(),
            skipped = report.skipped.len(),
            excluded = report.excluded.len(),
            errors = report.errors.len(),
            interrupted = report.interrupted,
            "add finished"
        );
        Ok(report)
    }
}

impl Default for Ingest {
    fn default() -> Self {
        Self::new()
    }
}

fn ingest_one(
    config: &ArchiveConfig,
    store: &mut MetadataStore,
    destination: &str,
    duplicates: DuplicatePolicy,
    prompt: &mut dyn DuplicatePrompt,
    candidate: &Candidate,
) -> Result<Outcome, ArchiveError> {
    let relative = join_archive_path(destination, &candidate.relative);

    if destination.is_empty() && policy::is_root_hidden(&relative) {
        debug!(path = %candidate.path.display(), "excluded hidden entry at archive root");
        return Ok(Outcome::Excluded);
    }
    if policy::contains_reserved(&relative, &config.reserved_dir) {
        return Ok(Outcome::Failed(EntryError::new(
            &candidate.path,
            format!("Destination {relative} passes through reserved directory {}", config.reserved_dir),
            EntryErrorKind::ReservedPath,
        )));
    }

    let identity = match identify(&candidate.path) {
        Ok(identity) => identity,
        Err(e) => return Ok(Outcome::Failed(EntryError::read(&candidate.path, &e))),
    };

    let existing = ExistingCopies::lookup(store, &identity)?;
    if let Some(copies) = &existing {
        if decide(duplicates, prompt, &candidate.path, &identity, copies) == Decision::Skip {
            info!(path = %candidate.path.display(), copies = copies.total, "skipped duplicate");
            return Ok(Outcome::Skipped(SkippedDuplicate {
                source: candidate.path.clone(),
                identity,
                existing: copies.clone(),
            }));
        }
    }

    let dest = config.absolute_path(&relative);
    if fs::symlink_metadata(&dest).is_ok() {
        return Ok(Outcome::Failed(EntryError::destination_exists(dest)));
    }

    if let Err(e) = copy_entry(&candidate.path, &dest, &identity) {
        return Ok(Outcome::Failed(e.into_entry_error(&candidate.path)));
    }

    match store.insert_entry(&relative, identity.size, &identity.fingerprint) {
        Ok(id) => {
            info!(%id, path = %relative, size = identity.size, "added");
            Ok(Outcome::Added(AddedEntry {
                id,
                source: candidate.path.clone(),
                path: relative,
                identity,
                existing,
            }))
        }
        Err(e) => {
            error!(path = %dest.display(), error = %e, "copied but not recorded");
            Ok(Outcome::Failed(EntryError::unindexed(dest, e)))
        }
    }
}

fn single_candidate(source: &Path, metadata: &fs::Metadata, report: &mut IngestReport) -> Vec<Candidate> {
    let Some(file_name) = source.file_name() else {
        debug!(path = %source.display(), "excluded add source");
        report.excluded.push(source.to_path_buf());
        return Vec::new();
    };
    let Some(name) = file_name.to_str().map(str::to_string) else {
        warn!(path = %source.display(), "source name is not valid UTF-8");
        report.errors.push(EntryError::unsupported_name(source));
        return Vec::new();
    };

    if policy::is_excluded_name(&name) || policy::is_hidden(&name) {
        debug!(path = %source.display(), "excluded add source");
        report.excluded.push(source.to_path_buf());
        return Vec::new();
    }

    let kind = if metadata.file_type().is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    vec![Candidate {
        path: source.to_path_buf(),
        relative: name,
        kind,
    }]
}

fn validate_destination(destination: &str, reserved: &str) -> Result<(), ArchiveError> {
    use policy::DestinationViolation;

    match policy::check_destination(destination, reserved) {
        Ok(()) => Ok(()),
        Err(DestinationViolation::Reserved) => Err(ArchiveError::ReservedDestination {
            destination: destination.to_string(),
            reserved: reserved.to_string(),
        }),
        Err(DestinationViolation::Hidden) => Err(ArchiveError::InvalidDestination {
            destination: destination.to_string(),
            reason: "must not start with '.'".to_string(),
        }),
        Err(DestinationViolation::Escapes) => Err(ArchiveError::InvalidDestination {
            destination: destination.to_string(),
            reason: "must stay inside the archive root".to_string(),
        }),
    }
}

fn join_archive_path(destination: &str, relative: &str) -> String {
    if destination.is_empty() {
        relative.to_string()
    } else {
        format!("{destination}/{relative}")
    }
}
