//! Duplicate groups recorded in the fingerprint index.
//!
//! Unlike a filesystem scan, nothing is hashed here: identities were
//! computed at ingest or reconciliation time, so grouping is a pure store
//! query.

use archivist_core::{ArchiveError, Fingerprint};
use archivist_store::MetadataStore;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the duplicate report.
#[derive(Debug, Clone, Default, Builder)]
#[builder(setter(into))]
pub struct DuplicateConfig {
    /// Maximum number of groups to return (0 = unlimited).
    #[builder(default = "0")]
    pub max_groups: usize,

    /// Maximum paths listed per group (0 = all).
    #[builder(default = "0")]
    pub max_paths: usize,
}

impl DuplicateConfig {
    /// Create a new config builder.
    pub fn builder() -> DuplicateConfigBuilder {
        DuplicateConfigBuilder::default()
    }
}

/// Entries sharing one (fingerprint, size) identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Fingerprint shared by all entries in this group.
    pub fingerprint: Fingerprint,

    /// Size of each entry in bytes.
    pub size: u64,

    /// Number of entries in the group.
    pub count: u64,

    /// Archive paths, oldest first (possibly truncated).
    pub paths: Vec<String>,

    /// Space taken by copies beyond the first: size * (count - 1).
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    /// Paths not listed because of `max_paths`.
    pub fn hidden_paths(&self) -> u64 {
        self.count.saturating_sub(self.paths.len() as u64)
    }
}

/// Results from duplicate analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Groups sorted by wasted space descending.
    pub groups: Vec<DuplicateGroup>,

    /// Total number of groups in the store (may exceed `groups.len()`).
    pub group_count: u64,

    /// Entries belonging to any group.
    pub entries_with_duplicates: u64,

    /// Total wasted space across every group.
    pub total_wasted_space: u64,
}

impl DuplicateReport {
    /// Check if any duplicates were found.
    pub fn has_duplicates(&self) -> bool {
        self.group_count > 0
    }
}

/// Builds duplicate reports from the store.
pub struct DuplicateFinder {
    config: DuplicateConfig,
}

impl DuplicateFinder {
    /// Create a new duplicate finder with default config.
    pub fn new() -> Self {
        Self {
            config: DuplicateConfig::default(),
        }
    }

    /// Create a new duplicate finder with custom config.
    pub fn with_config(config: DuplicateConfig) -> Self {
        Self { config }
    }

    /// Group the store's entries by identity.
    pub fn find_duplicates(&self, store: &MetadataStore) -> Result<DuplicateReport, ArchiveError> {
        let all = store.identity_groups(0)?;

        let mut report = DuplicateReport {
            group_count: all.len() as u64,
            ..Default::default()
        };
        for group in &all {
            report.entries_with_duplicates += group.count;
            report.total_wasted_space += wasted(group.size, group.count);
        }

        let shown = match self.config.max_groups {
            0 => all.len(),
            n => n.min(all.len()),
        };
        let max_paths = match self.config.max_paths {
            0 => usize::MAX,
            n => n,
        };

        for group in all.into_iter().take(shown) {
            let paths = store.find_by_identity(group.size, &group.fingerprint, max_paths)?;
            report.groups.push(DuplicateGroup {
                fingerprint: group.fingerprint,
                size: group.size,
                count: group.count,
                paths,
                wasted_bytes: wasted(group.size, group.count),
            });
        }

        Ok(report)
    }
}

impl Default for DuplicateFinder {
    fn default() -> Self {
        Self::new()
    }
}

fn wasted(size: u64, count: u64) -> u64 {
    size.saturating_mul(count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasted() {
        assert_eq!(wasted(4096, 3), 8192);
        assert_eq!(wasted(4096, 1), 0);
        assert_eq!(wasted(0, 5), 0);
    }

    #[test]
    fn test_empty_store() {
        let store = MetadataStore::open_in_memory().unwrap();
        let report = DuplicateFinder::new().find_duplicates(&store).unwrap();
        assert!(!report.has_duplicates());
        assert!(report.groups.is_empty());
    }
}
