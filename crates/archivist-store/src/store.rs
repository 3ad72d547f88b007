//! SQLite-backed metadata store.
//!
//! Two tables: `entries` holds one row per archived object and
//! `fingerprint_index` maps (fingerprint, size) to entry ids for duplicate
//! lookups. Every entry row is written together with its index row inside a
//! single transaction or savepoint, so a crash never leaves one without the
//! other.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use archivist_core::{Entry, EntryId, Fingerprint};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Schema version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Name of the secondary index over entry paths.
pub const PATH_INDEX_NAME: &str = "idx_entries_path";

/// Rows fetched per page when enumerating entries.
const ENTRY_PAGE_SIZE: usize = 512;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        size INTEGER NOT NULL,
        fingerprint TEXT NOT NULL,
        added_at TEXT NOT NULL,
        last_verified TEXT
    );
    CREATE TABLE IF NOT EXISTS fingerprint_index (
        fingerprint TEXT NOT NULL,
        size INTEGER NOT NULL,
        entry_id INTEGER NOT NULL,
        FOREIGN KEY(entry_id) REFERENCES entries(id)
    );
    CREATE INDEX IF NOT EXISTS idx_fingerprint_size ON fingerprint_index(fingerprint, size);
"#;

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Number of entries.
    pub total_entries: u64,
    /// Sum of entry sizes in bytes.
    pub total_size: u64,
    /// Number of (fingerprint, size) identities shared by two or more entries.
    pub duplicate_groups: u64,
    /// Entries never verified.
    pub unverified: u64,
}

/// An identity shared by more than one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGroup {
    /// Shared fingerprint.
    pub fingerprint: Fingerprint,
    /// Shared size.
    pub size: u64,
    /// Number of entries carrying this identity.
    pub count: u64,
}

/// Durable repository of archived entries.
pub struct MetadataStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Create (or open) a store at `path`, creating parent directories and
    /// the full schema including the path index.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        let store = Self::configure(conn, Some(path.to_path_buf()))?;
        store.create_path_index()?;
        info!(path = %path.display(), "created metadata store");
        Ok(store)
    }

    /// Open an existing store. The file must already exist.
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        let store = Self::configure(conn, Some(path.to_path_buf()))?;
        debug!(path = %path.display(), "opened metadata store");
        Ok(store)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::configure(Connection::open_in_memory()?, None)?;
        store.create_path_index()?;
        Ok(store)
    }

    fn configure(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal = %journal, "journal mode");
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        conn.execute_batch(SCHEMA)?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self { conn, path })
    }

    /// Location of the store file (None for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Atomically create one entry and its fingerprint index row.
    pub fn insert_entry(&mut self, path: &str, size: u64, fingerprint: &Fingerprint) -> Result<EntryId> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = insert_pair(&tx, path, size, fingerprint)?;
        tx.commit()?;
        debug!(%id, path, size, "recorded entry");
        Ok(id)
    }

    /// Start a batch of insertions committed together.
    pub fn batch(&mut self) -> Result<Batch<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Batch { tx, inserted: 0 })
    }

    /// Paths of up to `limit` entries with this identity, oldest first.
    pub fn find_by_identity(&self, size: u64, fingerprint: &Fingerprint, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT e.path FROM entries e \
             JOIN fingerprint_index f ON e.id = f.entry_id \
             WHERE f.fingerprint = ?1 AND f.size = ?2 \
             ORDER BY e.id LIMIT ?3",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let paths = stmt
            .query_map(params![fingerprint.to_hex(), to_db_size(size)?, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Number of entries with this identity.
    pub fn count_by_identity(&self, size: u64, fingerprint: &Fingerprint) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprint_index WHERE fingerprint = ?1 AND size = ?2",
            params![fingerprint.to_hex(), to_db_size(size)?],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Lazily enumerate all entries in id order.
    pub fn entries(&self) -> EntryIter<'_> {
        EntryIter {
            store: self,
            after: 0,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Look up a single entry by id.
    pub fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, size, fingerprint, added_at, last_verified FROM entries WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.0], entry_from_row)?;
        Ok(rows.next().transpose()?)
    }

    fn entry_page(&self, after: i64) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, size, fingerprint, added_at, last_verified FROM entries \
             WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![after, ENTRY_PAGE_SIZE as i64], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// All indexed paths.
    pub fn entry_paths(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM entries")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(paths)
    }

    /// Number of entries.
    pub fn entry_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Check whether the store holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entry_count()? == 0)
    }

    /// Stamp an entry as verified now.
    pub fn mark_verified(&self, id: EntryId) -> Result<()> {
        self.mark_verified_at(id, Utc::now())
    }

    /// Stamp an entry as verified at a given time.
    pub fn mark_verified_at(&self, id: EntryId, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE entries SET last_verified = ?1 WHERE id = ?2",
            params![at, id.0],
        )?;
        Ok(())
    }

    /// Remove every entry and index row, restarting id assignment.
    pub fn reset_all(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM fingerprint_index", [])?;
        let removed = tx.execute("DELETE FROM entries", [])?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'entries'", [])?;
        tx.commit()?;
        info!(removed, "reset metadata store");
        Ok(())
    }

    /// Aggregate counts for status reporting.
    pub fn counts(&self) -> Result<StoreCounts> {
        let (total_entries, total_size): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let duplicate_groups: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (SELECT 1 FROM fingerprint_index \
             GROUP BY fingerprint, size HAVING COUNT(*) > 1)",
            [],
            |row| row.get(0),
        )?;
        let unverified: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE last_verified IS NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreCounts {
            total_entries: total_entries as u64,
            total_size: total_size as u64,
            duplicate_groups: duplicate_groups as u64,
            unverified: unverified as u64,
        })
    }

    /// Identities shared by two or more entries, largest wasted space first.
    ///
    /// `limit` of 0 means unlimited.
    pub fn identity_groups(&self, limit: usize) -> Result<Vec<IdentityGroup>> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let mut stmt = self.conn.prepare_cached(
            "SELECT fingerprint, size, COUNT(*) FROM fingerprint_index \
             GROUP BY fingerprint, size HAVING COUNT(*) > 1 \
             ORDER BY size * (COUNT(*) - 1) DESC, COUNT(*) DESC, fingerprint LIMIT ?1",
        )?;
        let groups = stmt
            .query_map(params![limit], |row| {
                Ok(IdentityGroup {
                    fingerprint: fingerprint_column(row, 0)?,
                    size: size_column(row, 1)?,
                    count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Check whether the path index exists.
    pub fn has_path_index(&self) -> Result<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![PATH_INDEX_NAME],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// Create the path index if missing.
    pub fn create_path_index(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {PATH_INDEX_NAME} ON entries(path)"
        ))?;
        Ok(())
    }

    /// Drop the path index. Only meaningful for migration tests and tooling.
    pub fn drop_path_index(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP INDEX IF EXISTS {PATH_INDEX_NAME}"))?;
        Ok(())
    }

    /// Check the entry/index pairing invariant.
    ///
    /// Returns the number of entries without exactly one matching index row
    /// plus the number of index rows pointing at no entry.
    pub fn orphan_count(&self) -> Result<u64> {
        let unpaired: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries e WHERE \
             (SELECT COUNT(*) FROM fingerprint_index f \
              WHERE f.entry_id = e.id AND f.fingerprint = e.fingerprint AND f.size = e.size) != 1",
            [],
            |row| row.get(0),
        )?;
        let dangling: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprint_index f \
             WHERE NOT EXISTS (SELECT 1 FROM entries e WHERE e.id = f.entry_id)",
            [],
            |row| row.get(0),
        )?;
        Ok((unpaired + dangling) as u64)
    }
}

/// A group of insertions committed atomically together.
///
/// Each insertion runs in its own savepoint, so a failed insertion never
/// leaves half a pair behind. Dropping the batch without committing rolls
/// every insertion back.
pub struct Batch<'a> {
    tx: Transaction<'a>,
    inserted: usize,
}

impl Batch<'_> {
    /// Record one entry and its index row.
    pub fn insert(&mut self, path: &str, size: u64, fingerprint: &Fingerprint) -> Result<EntryId> {
        let sp = self.tx.savepoint()?;
        let id = insert_pair(&sp, path, size, fingerprint)?;
        sp.commit()?;
        self.inserted += 1;
        Ok(id)
    }

    /// Number of successful insertions so far.
    pub fn len(&self) -> usize {
        self.inserted
    }

    /// Check if nothing was inserted yet.
    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// Make every insertion durable.
    pub fn commit(self) -> Result<usize> {
        self.tx.commit()?;
        debug!(inserted = self.inserted, "committed batch");
        Ok(self.inserted)
    }
}

/// Paged iterator over entries in id order.
pub struct EntryIter<'a> {
    store: &'a MetadataStore,
    after: i64,
    page: VecDeque<Entry>,
    exhausted: bool,
}

impl Iterator for EntryIter<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            match self.store.entry_page(self.after) {
                Ok(page) => {
                    self.exhausted = page.len() < ENTRY_PAGE_SIZE;
                    if let Some(last) = page.last() {
                        self.after = last.id.0;
                    }
                    self.page.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.page.pop_front().map(Ok)
    }
}

fn insert_pair(conn: &Connection, path: &str, size: u64, fingerprint: &Fingerprint) -> Result<EntryId> {
    let size = to_db_size(size)?;
    let hex = fingerprint.to_hex();
    conn.prepare_cached(
        "INSERT INTO entries (path, size, fingerprint, added_at) VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![path, size, hex, Utc::now()])?;
    let id = conn.last_insert_rowid();
    conn.prepare_cached("INSERT INTO fingerprint_index (fingerprint, size, entry_id) VALUES (?1, ?2, ?3)")?
        .execute(params![hex, size, id])?;
    Ok(EntryId::new(id))
}

fn to_db_size(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| StoreError::SizeOutOfRange(size))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: EntryId::new(row.get(0)?),
        path: row.get(1)?,
        size: size_column(row, 2)?,
        fingerprint: fingerprint_column(row, 3)?,
        added_at: row.get(4)?,
        last_verified: row.get(5)?,
    })
}

fn size_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let size: i64 = row.get(idx)?;
    u64::try_from(size)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn fingerprint_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Fingerprint> {
    let hex: String = row.get(idx)?;
    Fingerprint::from_hex(&hex)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::new([byte; 32])
    }

    #[test]
    fn test_insert_and_find() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let a = store.insert_entry("docs/a", 5, &fp(1)).unwrap();
        let b = store.insert_entry("docs2/a", 5, &fp(1)).unwrap();
        store.insert_entry("docs/b", 5, &fp(2)).unwrap();

        assert!(b > a);
        assert_eq!(
            store.find_by_identity(5, &fp(1), 10).unwrap(),
            vec!["docs/a".to_string(), "docs2/a".to_string()]
        );
        assert_eq!(store.find_by_identity(5, &fp(1), 1).unwrap(), vec!["docs/a".to_string()]);
        assert!(store.find_by_identity(6, &fp(1), 10).unwrap().is_empty());
        assert_eq!(store.count_by_identity(5, &fp(1)).unwrap(), 2);
        assert_eq!(store.orphan_count().unwrap(), 0);
    }

    #[test]
    fn test_counts_on_empty_store() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.counts().unwrap(), StoreCounts::default());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_counts() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let a = store.insert_entry("a", 10, &fp(1)).unwrap();
        store.insert_entry("b", 10, &fp(1)).unwrap();
        store.insert_entry("c", 3, &fp(2)).unwrap();
        store.mark_verified(a).unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.total_entries, 3);
        assert_eq!(counts.total_size, 23);
        assert_eq!(counts.duplicate_groups, 1);
        assert_eq!(counts.unverified, 2);
    }

    #[test]
    fn test_batch_rollback_on_drop() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        {
            let mut batch = store.batch().unwrap();
            batch.insert("a", 1, &fp(1)).unwrap();
            assert_eq!(batch.len(), 1);
        }
        assert!(store.is_empty().unwrap());

        let mut batch = store.batch().unwrap();
        batch.insert("a", 1, &fp(1)).unwrap();
        batch.insert("b", 1, &fp(2)).unwrap();
        assert_eq!(batch.commit().unwrap(), 2);
        assert_eq!(store.entry_count().unwrap(), 2);
        assert_eq!(store.orphan_count().unwrap(), 0);
    }

    #[test]
    fn test_entries_paging() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let mut batch = store.batch().unwrap();
        for i in 0..(ENTRY_PAGE_SIZE + 3) {
            batch.insert(&format!("f{i}"), i as u64, &fp((i % 7) as u8)).unwrap();
        }
        batch.commit().unwrap();

        let entries: Vec<Entry> = store.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), ENTRY_PAGE_SIZE + 3);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(entries[0].path, "f0");
        assert!(entries[0].is_unverified());
    }

    #[test]
    fn test_reset_all_restarts_ids() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.insert_entry("a", 1, &fp(1)).unwrap();
        store.insert_entry("b", 1, &fp(1)).unwrap();
        store.reset_all().unwrap();

        assert_eq!(store.counts().unwrap(), StoreCounts::default());
        let id = store.insert_entry("c", 1, &fp(1)).unwrap();
        assert_eq!(id, EntryId::new(1));
    }

    #[test]
    fn test_identity_groups() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.insert_entry("small1", 1, &fp(1)).unwrap();
        store.insert_entry("small2", 1, &fp(1)).unwrap();
        store.insert_entry("small3", 1, &fp(1)).unwrap();
        store.insert_entry("big1", 100, &fp(2)).unwrap();
        store.insert_entry("big2", 100, &fp(2)).unwrap();
        store.insert_entry("unique", 7, &fp(3)).unwrap();

        let groups = store.identity_groups(0).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].size, 100);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[1].count, 3);
        assert_eq!(store.identity_groups(1).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_verified_sets_timestamp() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let id = store.insert_entry("a", 1, &fp(1)).unwrap();
        store.mark_verified(id).unwrap();
        let entry = store.get_entry(id).unwrap().unwrap();
        assert!(entry.last_verified.is_some());
        assert!(store.get_entry(EntryId::new(99)).unwrap().is_none());
    }
}
