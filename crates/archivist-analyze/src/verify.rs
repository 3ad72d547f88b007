//! Integrity verification of archived entries.
//!
//! Every recorded entry is checked against the file now at its path: first
//! presence (of the path itself; a symlink's target is irrelevant), then
//! size, then fingerprint. Verification never modifies archive content.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use archivist_core::{ArchiveError, Entry, EntryId, identify, policy};
use archivist_store::Archive;
use derive_builder::Builder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for verification.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct VerifyConfig {
    /// Stamp `last_verified` on healthy entries.
    #[builder(default = "true")]
    pub stamp: bool,

    /// Entries checked (in parallel) between cancellation checks.
    #[builder(default = "256")]
    pub batch_size: usize,

    /// Number of hashing threads (0 = rayon default).
    #[builder(default = "0")]
    pub threads: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            stamp: true,
            batch_size: 256,
            threads: 0,
        }
    }
}

impl VerifyConfig {
    /// Create a new config builder.
    pub fn builder() -> VerifyConfigBuilder {
        VerifyConfigBuilder::default()
    }
}

/// Kind of integrity finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum FindingKind {
    /// Nothing exists at the recorded path.
    #[strum(to_string = "MISSING")]
    Missing,
    /// The current size differs from the recorded size.
    #[strum(to_string = "CORRUPTED (size mismatch)")]
    SizeMismatch,
    /// Same size, different content.
    #[strum(to_string = "CORRUPTED (hash mismatch)")]
    HashMismatch,
    /// The path exists but could not be read.
    #[strum(to_string = "UNREADABLE")]
    Unreadable,
}

/// One discrepancy between the store and the disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Entry the finding is about.
    pub entry_id: EntryId,
    /// Archive-relative path.
    pub path: String,
    /// Kind of discrepancy.
    pub kind: FindingKind,
    /// Extra detail (expected and actual values, OS error).
    pub detail: Option<String>,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.path)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Progress information during verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyProgress {
    /// Entries checked so far.
    pub checked: u64,
    /// Entries in the store.
    pub total: u64,
    /// Findings so far.
    pub issues: u64,
    /// Last path checked.
    pub current_path: PathBuf,
    /// Time elapsed since verification started.
    pub elapsed: Duration,
}

/// Results from verification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Entries checked.
    pub checked: u64,
    /// Entries that matched their record.
    pub healthy: u64,
    /// Discrepancies, in entry id order.
    pub findings: Vec<Finding>,
    /// Healthy entries whose verification stamp could not be written.
    pub stamp_failures: u64,
    /// Cancellation stopped the run early.
    pub interrupted: bool,
    /// Wall time.
    pub duration: Duration,
}

impl VerifyReport {
    /// Number of findings.
    pub fn issue_count(&self) -> usize {
        self.findings.len()
    }

    /// Check if every entry was checked and found healthy.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && !self.interrupted
    }

    /// Findings of one kind.
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

/// Checks recorded entries against the archive tree.
pub struct Verifier {
    config: VerifyConfig,
    progress_tx: broadcast::Sender<VerifyProgress>,
    cancel: CancellationToken,
}

impl Verifier {
    /// Create a verifier with default config.
    pub fn new() -> Self {
        Self::with_config(VerifyConfig::default())
    }

    /// Create a verifier with custom config.
    pub fn with_config(config: VerifyConfig) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            config,
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
    pub fn subscribe(&self) -> broadcast::Receiver<VerifyProgress> {
        self.progress_tx.subscribe()
    }

    /// Verify every entry in the archive.
    ///
    /// Individual findings never stop the run. Only a failure to read the
    /// store itself is returned as an error.
    pub fn run(&self, archive: &Archive) -> Result<VerifyReport, ArchiveError> {
        let start = Instant::now();
        let root = archive.config().root.as_path();
        let store = archive.store();
        let total = store.entry_count()?;

        let pool = match self.config.threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ArchiveError::InvalidConfig {
                        message: format!("cannot start {n} verification threads: {e}"),
                    })?,
            ),
        };

        info!(root = %root.display(), total, "starting verification");
        let mut report = VerifyReport::default();
        let mut entries = store.entries();
        let batch_size = self.config.batch_size.max(1);

        loop {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let batch = entries
                .by_ref()
                .take(batch_size)
                .collect::<Result<Vec<Entry>, _>>()?;
            if batch.is_empty() {
                break;
            }

            let check_batch = || {
                batch
                    .par_iter()
                    .map(|entry| check_entry(root, entry))
                    .collect::<Vec<_>>()
            };
            let results = match &pool {
                Some(pool) => pool.install(check_batch),
                None => check_batch(),
            };

            for (entry, result) in batch.iter().zip(results) {
                report.checked += 1;
                match result {
                    None => {
                        report.healthy += 1;
                        debug!(path = %entry.path, "healthy");
                        if self.config.stamp {
                            if let Err(e) = store.mark_verified(entry.id) {
                                warn!(path = %entry.path, error = %e, "cannot stamp verification time");
                                report.stamp_failures += 1;
                            }
                        }
                    }
                    Some(finding) => {
                        warn!(path = %finding.path, kind = %finding.kind, "integrity finding");
                        report.findings.push(finding);
                    }
                }
            }

            let _ = self.progress_tx.send(VerifyProgress {
                checked: report.checked,
                total,
                issues: report.findings.len() as u64,
                current_path: batch
                    .last()
                    .map(|e| policy::from_archive_path(root, &e.path))
                    .unwrap_or_default(),
                elapsed: start.elapsed(),
            });
        }

        report.duration = start.elapsed();
        info!(
            checked = report.checked,
            issues = report.findings.len(),
            interrupted = report.interrupted,
            "verification finished"
        );
        Ok(report)
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Check one entry. Returns None when it is healthy.
pub fn check_entry(root: &Path, entry: &Entry) -> Option<Finding> {
    let path = policy::from_archive_path(root, &entry.path);
    let finding = |kind, detail: Option<String>| {
        Some(Finding {
            entry_id: entry.id,
            path: entry.path.clone(),
            kind,
            detail,
        })
    };

    let metadata = match fs::symlink_metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return finding(FindingKind::Missing, None),
        Err(e) => return finding(FindingKind::Unreadable, Some(e.to_string())),
    };

    let size_on_disk = if metadata.file_type().is_symlink() {
        0
    } else {
        metadata.len()
    };
    if size_on_disk != entry.size {
        return finding(
            FindingKind::SizeMismatch,
            Some(format!("expected {} bytes, found {size_on_disk}", entry.size)),
        );
    }

    let identity = match identify(&path) {
        Ok(identity) => identity,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return finding(FindingKind::Missing, None),
        Err(e) => return finding(FindingKind::Unreadable, Some(e.to_string())),
    };

    if identity.size != entry.size {
        return finding(
            FindingKind::SizeMismatch,
            Some(format!("expected {} bytes, read {}", entry.size, identity.size)),
        );
    }
    if identity.fingerprint != entry.fingerprint {
        return finding(
            FindingKind::HashMismatch,
            Some(format!("expected {}, found {}", entry.fingerprint, identity.fingerprint)),
        );
    }
    None
}
