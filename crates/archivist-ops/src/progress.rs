//! Progress reporting types for ingest.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Progress information for an ongoing ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestProgress {
    /// Candidates handled so far.
    pub processed: usize,
    /// Total candidates found under the source.
    pub total: usize,
    /// Entries added so far.
    pub added: usize,
    /// Duplicates skipped so far.
    pub skipped: usize,
    /// Per-entry errors so far.
    pub errors: usize,
    /// Bytes copied so far.
    pub bytes_copied: u64,
    /// The candidate currently being processed.
    pub current_file: Option<PathBuf>,
    /// Time elapsed since the ingest started.
    pub elapsed: Duration,
}

impl IngestProgress {
    /// Create a progress record for `total` candidates.
    pub fn new(total: usize) -> Self {
        Self {
            processed: 0,
            total,
            added: 0,
            skipped: 0,
            errors: 0,
            bytes_copied: 0,
            current_file: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            (self.processed as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let mut progress = IngestProgress::new(4);
        assert_eq!(progress.percentage(), 0.0);
        progress.processed = 1;
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(IngestProgress::new(0).percentage(), 0.0);
    }
}
