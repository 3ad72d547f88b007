use archivist_core::policy::{self, DestinationViolation};
use archivist_core::{
    ArchiveConfig, Entry, EntryId, EntryKind, Fingerprint, identify,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_identical_content_identical_identity() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.txt");
    let b = temp.path().join("nested_b.txt");
    let c = temp.path().join("c.txt");
    fs::write(&a, "duplicate content here").unwrap();
    fs::write(&b, "duplicate content here").unwrap();
    fs::write(&c, "unique content").unwrap();

    let ia = identify(&a).unwrap();
    let ib = identify(&b).unwrap();
    let ic = identify(&c).unwrap();

    assert_eq!(ia, ib);
    assert_ne!(ia.fingerprint, ic.fingerprint);
    assert_eq!(ia.size, "duplicate content here".len() as u64);
}

#[test]
fn test_identity_spans_multiple_chunks() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("big.bin");
    let len = archivist_core::identity::HASH_CHUNK_SIZE + 17;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &data).unwrap();

    let identity = identify(&path).unwrap();
    assert_eq!(identity.size, len as u64);
    assert_eq!(identity.fingerprint, Fingerprint::from(blake3::hash(&data)));
}

#[cfg(unix)]
#[test]
fn test_symlink_identity_ignores_target_content() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("target.txt");
    fs::write(&target, "Target Content").unwrap();
    let link = temp.path().join("link.txt");
    std::os::unix::fs::symlink("target.txt", &link).unwrap();

    let before = identify(&link).unwrap();
    fs::write(&target, "Changed Content").unwrap();
    let after = identify(&link).unwrap();

    assert_eq!(before, after);
    assert_eq!(before.kind, EntryKind::Symlink);
    assert_eq!(before.size, 0);
}

#[test]
fn test_hidden_root_entries() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir(root.join(".archive-index")).unwrap();
    fs::write(root.join(".DS_Store"), "dummy").unwrap();
    fs::write(root.join("visible.txt"), "ok").unwrap();

    assert!(
        policy::hidden_root_entries(root, ".archive-index")
            .unwrap()
            .is_empty()
    );

    fs::write(root.join(".env"), "secret").unwrap();
    fs::create_dir(root.join(".git")).unwrap();
    assert_eq!(
        policy::hidden_root_entries(root, ".archive-index").unwrap(),
        vec![".env".to_string(), ".git".to_string()]
    );
}

#[test]
fn test_destination_rules() {
    let config = ArchiveConfig::new("/archive");
    let reserved = config.reserved_dir.as_str();

    assert!(policy::check_destination("photos/2024", reserved).is_ok());
    assert_eq!(
        policy::check_destination(".cache", reserved),
        Err(DestinationViolation::Hidden)
    );
    assert_eq!(
        policy::check_destination("a/.archive-index", reserved),
        Err(DestinationViolation::Reserved)
    );
    assert_eq!(
        policy::check_destination("/etc", reserved),
        Err(DestinationViolation::Escapes)
    );
}

#[test]
fn test_entry_serialization() {
    let entry = Entry {
        id: EntryId::new(7),
        path: "docs/x.txt".to_string(),
        size: 5,
        fingerprint: Fingerprint::new([0xde; 32]),
        added_at: chrono::Utc::now(),
        last_verified: None,
    };
    assert!(entry.is_unverified());

    let json = serde_json::to_string(&entry).unwrap();
    let back: Entry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, entry);
}
