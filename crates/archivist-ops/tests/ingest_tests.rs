use archivist_core::{ArchiveConfig, ArchiveError, EntryErrorKind, Identity, identify};
use archivist_ops::{DuplicatePolicy, ExistingCopies, Ingest, IngestRequest};
use archivist_scan::{Reconciler, ScanMode};
use archivist_store::Archive;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    _archive_dir: TempDir,
    source_dir: TempDir,
    archive: Archive,
}

impl Fixture {
    fn new() -> Self {
        let archive_dir = TempDir::new().unwrap();
        let (archive, _) = Archive::init(ArchiveConfig::new(archive_dir.path())).unwrap();
        Self {
            _archive_dir: archive_dir,
            source_dir: TempDir::new().unwrap(),
            archive,
        }
    }

    fn root(&self) -> PathBuf {
        self.archive.config().root.clone()
    }

    fn source(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.source_dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn add(&mut self, source: &Path, destination: &str, policy: DuplicatePolicy) -> archivist_ops::IngestReport {
        let request = IngestRequest::new(source, destination, policy);
        let mut never = |_: &Path, _: &Identity, _: &ExistingCopies| false;
        Ingest::new().run(&mut self.archive, &request, &mut never).unwrap()
    }
}

#[test]
fn test_add_then_skip_duplicate() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");

    let report = fx.add(&x, "docs", DuplicatePolicy::Ask);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].path, "docs/X");
    assert_eq!(report.added[0].identity.size, 5);
    assert_eq!(fs::read_to_string(fx.root().join("docs/X")).unwrap(), "hello");

    let report = fx.add(&x, "docs2", DuplicatePolicy::Skip);
    assert!(report.added.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].existing.paths, vec!["docs/X".to_string()]);
    assert!(!fx.root().join("docs2/X").exists());
    assert_eq!(fx.archive.store().entry_count().unwrap(), 1);
}

#[test]
fn test_accept_duplicates_reports_existing() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");
    fx.add(&x, "docs", DuplicatePolicy::Ask);

    let report = fx.add(&x, "copies", DuplicatePolicy::Accept);
    assert_eq!(report.added.len(), 1);
    let existing = report.added[0].existing.as_ref().unwrap();
    assert_eq!(existing.paths, vec!["docs/X".to_string()]);

    let identity = identify(&x).unwrap();
    let paths = fx
        .archive
        .store()
        .find_by_identity(identity.size, &identity.fingerprint, 10)
        .unwrap();
    assert_eq!(paths, vec!["docs/X".to_string(), "copies/X".to_string()]);
}

#[test]
fn test_non_interactive_skips_without_asking() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");
    fx.add(&x, "docs", DuplicatePolicy::Ask);

    let request = IngestRequest::new(&x, "again", DuplicatePolicy::SkipNonInteractive);
    let mut asked = false;
    let mut prompt = |_: &Path, _: &Identity, _: &ExistingCopies| {
        asked = true;
        true
    };
    let report = Ingest::new().run(&mut fx.archive, &request, &mut prompt).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert!(!asked);
}

#[test]
fn test_prompt_sees_capped_copies() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "same");
    for i in 0..12 {
        fx.add(&x, &format!("d{i:02}"), DuplicatePolicy::Accept);
    }

    let request = IngestRequest::new(&x, "last", DuplicatePolicy::Ask);
    let mut seen = None;
    let mut prompt = |_: &Path, identity: &Identity, existing: &ExistingCopies| {
        seen = Some((identity.size, existing.clone()));
        true
    };
    let report = Ingest::new().run(&mut fx.archive, &request, &mut prompt).unwrap();
    assert_eq!(report.added.len(), 1);

    let (size, existing) = seen.unwrap();
    assert_eq!(size, 4);
    assert_eq!(existing.paths.len(), 10);
    assert_eq!(existing.paths[0], "d00/X");
    assert_eq!(existing.total, 12);
    assert_eq!(existing.remaining(), 2);
}

#[test]
fn test_directory_source_preserves_layout() {
    let mut fx = Fixture::new();
    fx.source("trip/a.jpg", "a");
    fx.source("trip/day2/b.jpg", "b");
    fx.source("trip/day2/.DS_Store", "junk");
    fx.source("trip/.notes", "nested hidden");

    let report = fx.add(&fx.source_dir.path().join("trip"), "photos", DuplicatePolicy::Ask);
    let paths: Vec<_> = report.added.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["photos/.notes", "photos/a.jpg", "photos/day2/b.jpg"]);
    assert!(!fx.root().join("photos/day2/.DS_Store").exists());
}

#[test]
fn test_existing_destination_not_overwritten() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "new content");
    fs::create_dir_all(fx.root().join("docs")).unwrap();
    fs::write(fx.root().join("docs/X"), "old").unwrap();

    let report = fx.add(&x, "docs", DuplicatePolicy::Ask);
    assert!(report.added.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::DestinationExists);
    assert_eq!(fs::read_to_string(fx.root().join("docs/X")).unwrap(), "old");
}

#[test]
fn test_reserved_and_invalid_destinations() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");
    let mut never = |_: &Path, _: &Identity, _: &ExistingCopies| false;

    for (destination, reserved) in [
        (".archive-index", true),
        ("a/.archive-index/b", true),
        (".hidden", false),
        ("../escape", false),
    ] {
        let request = IngestRequest::new(&x, destination, DuplicatePolicy::Ask);
        let err = Ingest::new()
            .run(&mut fx.archive, &request, &mut never)
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(matches!(err, ArchiveError::ReservedDestination { .. }), reserved);
    }
    assert!(fx.archive.store().is_empty().unwrap());
}

#[test]
fn test_reserved_segment_inside_source_tree() {
    let mut fx = Fixture::new();
    fx.source("tree/.archive-index/sneaky", "x");
    fx.source("tree/ok", "y");

    let report = fx.add(&fx.source_dir.path().join("tree"), "in", DuplicatePolicy::Ask);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::ReservedPath);
}

#[test]
fn test_excluded_single_sources() {
    let mut fx = Fixture::new();
    let ds = fx.source(".DS_Store", "junk");
    let hidden = fx.source(".secret", "x");

    assert_eq!(fx.add(&ds, "docs", DuplicatePolicy::Ask).excluded.len(), 1);
    assert_eq!(fx.add(&hidden, "docs", DuplicatePolicy::Ask).excluded.len(), 1);
    assert!(fx.archive.store().is_empty().unwrap());
}

#[test]
fn test_add_into_root_excludes_hidden_top_level() {
    let mut fx = Fixture::new();
    fx.source("src/.hidden", "x");
    fx.source("src/visible", "y");
    fx.source("src/sub/.ok", "z");

    let report = fx.add(&fx.source_dir.path().join("src"), "", DuplicatePolicy::Ask);
    let paths: Vec<_> = report.added.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["sub/.ok", "visible"]);
    assert_eq!(report.excluded.len(), 1);
    assert!(!fx.root().join(".hidden").exists());
}

#[test]
fn test_missing_source() {
    let mut fx = Fixture::new();
    let mut never = |_: &Path, _: &Identity, _: &ExistingCopies| false;
    let request = IngestRequest::new(fx.source_dir.path().join("nope"), "docs", DuplicatePolicy::Ask);

    let err = Ingest::new()
        .run(&mut fx.archive, &request, &mut never)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::SourceNotFound { .. }));
}

#[test]
fn test_cancelled_ingest_adds_nothing() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");
    let token = CancellationToken::new();
    token.cancel();

    let request = IngestRequest::new(&x, "docs", DuplicatePolicy::Ask);
    let mut never = |_: &Path, _: &Identity, _: &ExistingCopies| false;
    let report = Ingest::new()
        .with_cancellation(token)
        .run(&mut fx.archive, &request, &mut never)
        .unwrap();

    assert!(report.interrupted);
    assert!(report.added.is_empty());
}

#[cfg(unix)]
#[test]
fn test_symlink_added_as_link() {
    let mut fx = Fixture::new();
    let link = fx.source_dir.path().join("link");
    std::os::unix::fs::symlink("/nowhere/target", &link).unwrap();

    let report = fx.add(&link, "links", DuplicatePolicy::Ask);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].identity.size, 0);

    let archived = fx.root().join("links/link");
    assert!(fs::symlink_metadata(&archived).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&archived).unwrap(), PathBuf::from("/nowhere/target"));
}

#[test]
fn test_destination_spellings_record_one_path() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");
    let y = fx.source("Y", "world");

    let report = fx.add(&x, "docs//sub", DuplicatePolicy::Ask);
    assert_eq!(report.added[0].path, "docs/sub/X");
    let report = fx.add(&y, "./docs/./sub/", DuplicatePolicy::Ask);
    assert_eq!(report.added[0].path, "docs/sub/Y");
    assert_eq!(fs::read_to_string(fx.root().join("docs/sub/Y")).unwrap(), "world");

    let report = Reconciler::new()
        .run(&mut fx.archive, ScanMode::Resume)
        .unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(fx.archive.store().entry_count().unwrap(), 2);
}

#[test]
fn test_store_failure_after_copy_leaves_file_for_scan() {
    let mut fx = Fixture::new();
    let x = fx.source("X", "hello");

    let side = rusqlite::Connection::open(fx.archive.config().resolved_store_path()).unwrap();
    side.execute_batch(
        "CREATE TRIGGER refuse_entries BEFORE INSERT ON entries \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();

    let report = fx.add(&x, "docs", DuplicatePolicy::Ask);
    assert!(report.added.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::Unindexed);
    assert_eq!(report.errors[0].path, fx.root().join("docs/X"));
    assert_eq!(fs::read_to_string(fx.root().join("docs/X")).unwrap(), "hello");
    assert!(fx.archive.store().is_empty().unwrap());

    side.execute_batch("DROP TRIGGER refuse_entries;").unwrap();
    let report = Reconciler::new()
        .run(&mut fx.archive, ScanMode::Resume)
        .unwrap();
    assert_eq!(report.indexed, 1);
    assert!(fx.archive.store().entry_paths().unwrap().contains("docs/X"));
}

#[test]
fn test_vanished_candidate_reported_and_rest_added() {
    let mut fx = Fixture::new();
    let seed = fx.source("seed", "same");
    fx.add(&seed, "old", DuplicatePolicy::Ask);

    fx.source("batch/a", "same");
    let b = fx.source("batch/b", "doomed");
    fx.source("batch/c", "kept");

    // Answering the prompt for `a` removes `b` before it is processed.
    let mut remove_b = |_: &Path, _: &Identity, _: &ExistingCopies| {
        fs::remove_file(&b).unwrap();
        true
    };
    let request = IngestRequest::new(fx.source_dir.path().join("batch"), "new", DuplicatePolicy::Ask);
    let report = Ingest::new()
        .run(&mut fx.archive, &request, &mut remove_b)
        .unwrap();

    let paths: Vec<_> = report.added.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["new/a", "new/c"]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::Vanished);
    assert_eq!(report.errors[0].path, b);
    assert!(!fx.root().join("new/b").exists());
}

#[cfg(unix)]
#[test]
fn test_unreadable_candidate_reported_and_rest_added() {
    use std::os::unix::fs::PermissionsExt;

    let mut fx = Fixture::new();
    fx.source("batch/a", "first");
    let locked = fx.source("batch/b", "secret");
    fx.source("batch/c", "last");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Permission bits are not enforced for this user (e.g. root).
        return;
    }

    let report = fx.add(&fx.source_dir.path().join("batch"), "in", DuplicatePolicy::Ask);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    let paths: Vec<_> = report.added.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["in/a", "in/c"]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::Unreadable);
    assert!(!fx.root().join("in/b").exists());
}

#[cfg(unix)]
#[test]
fn test_non_utf8_source_name_reported() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let mut fx = Fixture::new();
    let odd = fx.source_dir.path().join(OsStr::from_bytes(b"odd\xff.txt"));
    if fs::write(&odd, "bytes").is_err() {
        // Filesystem only accepts UTF-8 names.
        return;
    }

    let report = fx.add(&odd, "docs", DuplicatePolicy::Ask);
    assert!(report.added.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, EntryErrorKind::UnsupportedName);
    assert!(fx.archive.store().is_empty().unwrap());
}
