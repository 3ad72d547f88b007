//! Reconciliation progress reporting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Which phase a reconciliation is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanPhase {
    /// Walking the archive tree.
    Walking,
    /// Hashing candidates and writing entries.
    Indexing,
    /// All work is done.
    Finished,
}

/// Progress information during a reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    /// Current phase.
    pub phase: ScanPhase,
    /// Candidates found by the walk.
    pub candidates: u64,
    /// Entries written so far.
    pub indexed: u64,
    /// Candidates skipped because they were already indexed.
    pub skipped: u64,
    /// Total bytes hashed so far.
    pub bytes_hashed: u64,
    /// Number of per-entry errors so far.
    pub errors_count: u64,
    /// Last path handled.
    pub current_path: PathBuf,
    /// Time elapsed since the reconciliation started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Fraction of candidates handled, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.candidates == 0 {
            return 0.0;
        }
        let done = self.indexed + self.skipped + self.errors_count;
        (done as f64 / self.candidates as f64).min(1.0)
    }

    /// Hashing throughput in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.bytes_hashed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Internal progress tracker with timing.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Instant,
    phase: ScanPhase,
    candidates: u64,
    indexed: u64,
    skipped: u64,
    bytes_hashed: u64,
    errors_count: u64,
    current_path: PathBuf,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            phase: ScanPhase::Walking,
            candidates: 0,
            indexed: 0,
            skipped: 0,
            bytes_hashed: 0,
            errors_count: 0,
            current_path: PathBuf::new(),
        }
    }

    pub fn set_phase(&mut self, phase: ScanPhase) {
        self.phase = phase;
    }

    pub fn set_candidates(&mut self, candidates: u64, skipped: u64) {
        self.candidates = candidates;
        self.skipped = skipped;
    }

    pub fn record_indexed(&mut self, count: u64, bytes: u64) {
        self.indexed += count;
        self.bytes_hashed += bytes;
    }

    pub fn record_errors(&mut self, count: u64) {
        self.errors_count += count;
    }

    pub fn set_current_path(&mut self, path: PathBuf) {
        self.current_path = path;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            phase: self.phase,
            candidates: self.candidates,
            indexed: self.indexed,
            skipped: self.skipped,
            bytes_hashed: self.bytes_hashed,
            errors_count: self.errors_count,
            current_path: self.current_path.clone(),
            elapsed: self.start_time.elapsed(),
        }
    }
}
