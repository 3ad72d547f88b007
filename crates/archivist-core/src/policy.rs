//! Name-pattern policies over archive paths.
//!
//! These are pure predicates; nothing here touches the filesystem except
//! [`hidden_root_entries`], which only lists a directory.

use std::io;
use std::path::{Component, Path};

/// Prefix marking a hidden entry.
pub const HIDDEN_PREFIX: char = '.';

/// Operating-system metadata files that are never archived.
pub const EXCLUDED_NAMES: &[&str] = &[".DS_Store"];

/// Check if a file name is hidden.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX)
}

/// Check if a file name is a platform metadata nuisance file.
pub fn is_excluded_name(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name)
}

/// Check if the final component of a path is excluded from archiving.
pub fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_excluded_name)
}

/// Check if an archive-relative path starts with a hidden segment.
///
/// Such a path would land as a hidden entry directly under the archive root.
pub fn is_root_hidden(relative: &str) -> bool {
    relative
        .split('/')
        .find(|segment| !segment.is_empty())
        .is_some_and(is_hidden)
}

/// Check if any segment of an archive-relative path is the reserved name.
pub fn contains_reserved(relative: &str, reserved: &str) -> bool {
    relative.split('/').any(|segment| segment == reserved)
}

/// Why a destination subdirectory is unacceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationViolation {
    /// Starts with the hidden prefix.
    Hidden,
    /// Names or passes through the reserved storage area.
    Reserved,
    /// Absolute, or climbs out of the archive with `..`.
    Escapes,
}

/// Validate an add destination subdirectory.
///
/// The empty string (or `.`) denotes the archive root and is accepted.
/// Empty and `.` segments are tolerated; [`canonical_destination`] drops them.
pub fn check_destination(dest: &str, reserved: &str) -> Result<(), DestinationViolation> {
    for component in Path::new(dest).components() {
        match component {
            Component::Normal(segment) => {
                if segment.to_str() == Some(reserved) {
                    return Err(DestinationViolation::Reserved);
                }
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DestinationViolation::Escapes);
            }
        }
    }
    if is_root_hidden(&canonical_destination(dest)) {
        return Err(DestinationViolation::Hidden);
    }
    Ok(())
}

/// Spell a validated destination the way stored paths spell it.
///
/// `docs//sub/`, `./docs/./sub` and `docs/sub` all become `docs/sub`; the
/// root becomes "".
pub fn canonical_destination(dest: &str) -> String {
    dest.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a relative filesystem path into the `/`-separated archive form.
///
/// Returns None when a segment is not valid UTF-8; such a name cannot be
/// stored without losing the way back to the file.
pub fn to_archive_path(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            segments.push(segment.to_str()?);
        }
    }
    Some(segments.join("/"))
}

/// Join an archive-relative `/`-separated path onto a root directory.
pub fn from_archive_path(root: &Path, relative: &str) -> std::path::PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// List hidden names directly under the archive root that block initialization.
///
/// The reserved directory and platform metadata files are tolerated.
pub fn hidden_root_entries(root: &Path, reserved: &str) -> io::Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) && name != reserved && !is_excluded_name(&name) {
            found.push(name);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVED: &str = ".archive-index";

    #[test]
    fn test_hidden_and_excluded() {
        assert!(is_hidden(".env"));
        assert!(!is_hidden("env"));
        assert!(is_excluded_name(".DS_Store"));
        assert!(!is_excluded_name("DS_Store"));
        assert!(is_excluded(Path::new("/a/b/.DS_Store")));
        assert!(!is_excluded(Path::new("/a/b/.env")));
    }

    #[test]
    fn test_root_hidden() {
        assert!(is_root_hidden(".env"));
        assert!(is_root_hidden(".git/config"));
        assert!(!is_root_hidden("docs/.env"));
    }

    #[test]
    fn test_check_destination() {
        assert!(check_destination("docs", RESERVED).is_ok());
        assert!(check_destination("docs/2024", RESERVED).is_ok());
        assert!(check_destination("", RESERVED).is_ok());
        assert_eq!(
            check_destination(".hidden", RESERVED),
            Err(DestinationViolation::Hidden)
        );
        assert_eq!(
            check_destination(RESERVED, RESERVED),
            Err(DestinationViolation::Reserved)
        );
        assert_eq!(
            check_destination("docs/.archive-index/x", RESERVED),
            Err(DestinationViolation::Reserved)
        );
        assert_eq!(
            check_destination("docs/../..", RESERVED),
            Err(DestinationViolation::Escapes)
        );
        assert_eq!(
            check_destination("/docs", RESERVED),
            Err(DestinationViolation::Escapes)
        );
        assert!(check_destination("./", RESERVED).is_ok());
        assert!(check_destination("docs//sub/./x/", RESERVED).is_ok());
        assert!(check_destination("docs/.config", RESERVED).is_ok());
        assert_eq!(
            check_destination("./.hidden", RESERVED),
            Err(DestinationViolation::Hidden)
        );
    }

    #[test]
    fn test_canonical_destination() {
        assert_eq!(canonical_destination("docs//sub"), "docs/sub");
        assert_eq!(canonical_destination("docs/./sub/"), "docs/sub");
        assert_eq!(canonical_destination("./docs"), "docs");
        assert_eq!(canonical_destination("."), "");
        assert_eq!(canonical_destination(""), "");
    }

    #[test]
    fn test_archive_path_round_trip() {
        let rel = Path::new("docs").join("sub").join("x.txt");
        let archive = to_archive_path(&rel).unwrap();
        assert_eq!(archive, "docs/sub/x.txt");
        assert_eq!(
            from_archive_path(Path::new("/root"), &archive),
            Path::new("/root").join("docs").join("sub").join("x.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_has_no_archive_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let rel = Path::new("docs").join(OsStr::from_bytes(b"bad\xff.txt"));
        assert_eq!(to_archive_path(&rel), None);
    }

    #[test]
    fn test_contains_reserved() {
        assert!(contains_reserved("a/.archive-index/b", RESERVED));
        assert!(!contains_reserved("a/archive-index/b", RESERVED));
    }
}
