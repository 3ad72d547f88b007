//! JWalk-based tree walker yielding archive candidates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use archivist_core::{ArchiveConfig, EntryError, EntryErrorKind, EntryKind, policy};
use jwalk::{Parallelism, WalkDir};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A regular file or symlink discovered by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute (root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    /// File or symlink.
    pub kind: EntryKind,
}

/// What a walk skips.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Directory name pruned at every depth (never descended into).
    pub prune_name: Option<String>,
    /// Skip hidden entries that are direct children of the walk root.
    pub skip_root_hidden: bool,
    /// Number of threads for directory reading (0 = auto-detect).
    pub threads: usize,
}

impl WalkOptions {
    /// Options for walking an archive root.
    pub fn for_archive(config: &ArchiveConfig) -> Self {
        Self {
            prune_name: Some(config.reserved_dir.clone()),
            skip_root_hidden: true,
            threads: config.hash_threads,
        }
    }

    /// Options for walking an add source tree.
    pub fn for_source() -> Self {
        Self::default()
    }
}

/// Result of walking a tree.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Candidates in depth-first, name-sorted order.
    pub candidates: Vec<Candidate>,
    /// Entries the walk could not read.
    pub errors: Vec<EntryError>,
    /// The walk stopped early because it was cancelled.
    pub interrupted: bool,
}

/// Walks a directory tree collecting files and symlinks.
///
/// Platform metadata files are excluded at every depth. Directories are
/// traversed but never yielded; symlinks are yielded, never followed.
pub struct TreeWalker {
    options: WalkOptions,
}

impl TreeWalker {
    /// Create a walker with the given options.
    pub fn new(options: WalkOptions) -> Self {
        Self { options }
    }

    /// Walk `root`, stopping early if `cancel` fires.
    pub fn walk(&self, root: &Path, cancel: &CancellationToken) -> WalkOutcome {
        let parallelism = match self.options.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };

        let prune_name = self.options.prune_name.clone();
        let skip_root_hidden = self.options.skip_root_hidden;

        let walker = WalkDir::new(root)
            .parallelism(parallelism)
            .skip_hidden(false)
            .follow_links(false)
            .sort(true)
            .process_read_dir(move |_depth, _path, _state, children| {
                children.retain(|child| match child {
                    Ok(entry) => {
                        let name = entry.file_name.to_string_lossy();
                        if prune_name.as_deref() == Some(name.as_ref()) && entry.file_type.is_dir() {
                            return false;
                        }
                        !(skip_root_hidden && entry.depth == 1 && policy::is_hidden(&name))
                    }
                    Err(_) => true,
                });
            });

        let mut outcome = WalkOutcome::default();

        for entry_result in walker {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                break;
            }

            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "walk error");
                    outcome
                        .errors
                        .push(EntryError::new(path, err.to_string(), EntryErrorKind::Walk));
                    continue;
                }
            };

            if entry.depth == 0 {
                continue;
            }

            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };

            let path = entry.path();
            if policy::is_excluded(&path) {
                debug!(path = %path.display(), "excluded platform metadata file");
                continue;
            }

            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let Some(relative) = policy::to_archive_path(rel) else {
                warn!(path = %path.display(), "skipping name that is not valid UTF-8");
                outcome.errors.push(EntryError::unsupported_name(&path));
                continue;
            };

            outcome.candidates.push(Candidate {
                path,
                relative,
                kind,
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("dir1/subdir")).unwrap();
        fs::create_dir(root.join(".archive-index")).unwrap();
        fs::create_dir(root.join(".hidden")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world").unwrap();
        fs::write(root.join("dir1/.env"), "nested hidden").unwrap();
        fs::write(root.join("dir1/.DS_Store"), "junk").unwrap();
        fs::write(root.join("dir1/subdir/file3.txt"), "test").unwrap();
        fs::write(root.join(".archive-index/archive.db"), "db").unwrap();
        fs::write(root.join(".hidden/file"), "content").unwrap();
        fs::write(root.join(".manual"), "ignore me").unwrap();

        temp
    }

    fn relatives(outcome: &WalkOutcome) -> Vec<&str> {
        outcome.candidates.iter().map(|c| c.relative.as_str()).collect()
    }

    #[test]
    fn test_archive_walk() {
        let temp = create_test_tree();
        let config = ArchiveConfig::new(temp.path());
        let walker = TreeWalker::new(WalkOptions::for_archive(&config));
        let outcome = walker.walk(temp.path(), &CancellationToken::new());

        let mut found = relatives(&outcome);
        found.sort();
        assert_eq!(
            found,
            vec!["dir1/.env", "dir1/file2.txt", "dir1/subdir/file3.txt", "file1.txt"]
        );
        assert!(outcome.errors.is_empty());
        assert!(!outcome.interrupted);
    }

    #[test]
    fn test_source_walk_keeps_root_hidden() {
        let temp = create_test_tree();
        let walker = TreeWalker::new(WalkOptions::for_source());
        let outcome = walker.walk(temp.path(), &CancellationToken::new());

        let found = relatives(&outcome);
        assert!(found.contains(&".manual"));
        assert!(found.contains(&".hidden/file"));
        assert!(!found.iter().any(|p| p.ends_with(".DS_Store")));
    }

    #[test]
    fn test_cancelled_walk() {
        let temp = create_test_tree();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = TreeWalker::new(WalkOptions::for_source()).walk(temp.path(), &token);
        assert!(outcome.interrupted);
        assert!(outcome.candidates.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("real")).unwrap();
        fs::write(temp.path().join("real/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink("real", temp.path().join("alias")).unwrap();

        let outcome = TreeWalker::new(WalkOptions::for_source()).walk(temp.path(), &CancellationToken::new());
        let alias = outcome
            .candidates
            .iter()
            .find(|c| c.relative == "alias")
            .unwrap();
        assert_eq!(alias.kind, EntryKind::Symlink);
        assert!(!outcome.candidates.iter().any(|c| c.relative == "alias/a.txt"));
    }
}
