//! Archive configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default name of the reserved directory holding the store.
pub const DEFAULT_RESERVED_DIR: &str = ".archive-index";

/// Default file name of the store inside the reserved directory.
pub const DEFAULT_STORE_FILE: &str = "archive.db";

/// Default number of insertions per commit during bulk indexing.
pub const DEFAULT_COMMIT_INTERVAL: usize = 100;

/// Configuration shared by every archive command.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ArchiveConfig {
    /// Archive root directory.
    pub root: PathBuf,

    /// External store location (None = inside the reserved directory).
    #[builder(default)]
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Name of the reserved directory under the archive root.
    #[builder(default = "DEFAULT_RESERVED_DIR.to_string()")]
    #[serde(default = "default_reserved_dir")]
    pub reserved_dir: String,

    /// Store file name inside the reserved directory.
    #[builder(default = "DEFAULT_STORE_FILE.to_string()")]
    #[serde(default = "default_store_file")]
    pub store_file: String,

    /// Successful insertions between commits during bulk indexing.
    #[builder(default = "DEFAULT_COMMIT_INTERVAL")]
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,

    /// Number of hashing threads (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub hash_threads: usize,
}

fn default_reserved_dir() -> String {
    DEFAULT_RESERVED_DIR.to_string()
}

fn default_store_file() -> String {
    DEFAULT_STORE_FILE.to_string()
}

fn default_commit_interval() -> usize {
    DEFAULT_COMMIT_INTERVAL
}

impl ArchiveConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if let Some(ref reserved) = self.reserved_dir {
            if reserved.is_empty() || reserved.contains(['/', '\\']) {
                return Err(format!("Invalid reserved directory name: {reserved:?}"));
            }
        }
        if self.commit_interval == Some(0) {
            return Err("Commit interval must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ArchiveConfig {
    /// Create a new archive config builder.
    pub fn builder() -> ArchiveConfigBuilder {
        ArchiveConfigBuilder::default()
    }

    /// Create a config for an archive root with the default store location.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store_path: None,
            reserved_dir: DEFAULT_RESERVED_DIR.to_string(),
            store_file: DEFAULT_STORE_FILE.to_string(),
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            hash_threads: 0,
        }
    }

    /// Use an external store file instead of the reserved directory.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// The reserved directory inside the archive root.
    pub fn reserved_path(&self) -> PathBuf {
        self.root.join(&self.reserved_dir)
    }

    /// Where the store lives for this archive.
    pub fn resolved_store_path(&self) -> PathBuf {
        match &self.store_path {
            Some(path) => path.clone(),
            None => self.reserved_path().join(&self.store_file),
        }
    }

    /// Check if the store is kept outside the archive root.
    pub fn has_external_store(&self) -> bool {
        self.store_path.is_some()
    }

    /// Express an absolute path under the root in archive form.
    ///
    /// Returns None if the path is not below the root.
    pub fn archive_path(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .and_then(crate::policy::to_archive_path)
    }

    /// Archive path of an external store that lives under the root.
    ///
    /// Both locations are resolved first, so a relative `store_path`, a
    /// `..` segment or a symlinked root still match the file the store
    /// actually writes.
    pub fn store_archive_path(&self) -> Option<String> {
        let store = resolve_file(self.store_path.as_deref()?);
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| absolute_or_same(&self.root));
        store
            .strip_prefix(&root)
            .ok()
            .and_then(crate::policy::to_archive_path)
    }

    /// Resolve an archive-relative path against the root.
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        crate::policy::from_archive_path(&self.root, relative)
    }
}

/// Absolute form of `path` with its parent directory resolved.
fn resolve_file(path: &Path) -> PathBuf {
    let absolute = absolute_or_same(path);
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

fn absolute_or_same(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
