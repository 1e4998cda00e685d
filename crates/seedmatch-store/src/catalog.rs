//! The file catalog: a size-indexed view of locally indexed files.
//!
//! The catalog is populated by the deduplication indexer; the matcher only
//! reads it. Entries are kept in two column families so the size lookup the
//! matcher depends on is a prefix scan rather than a full iteration:
//! - `files`: path -> big-endian size || hash
//! - `files_by_size`: big-endian size || path -> hash

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, DB};
use seedmatch_core::FileHash;
use tracing::debug;

use crate::StoreError;

/// Column family holding path-keyed rows.
const FILES_CF: &str = "files";
/// Column family holding the size index.
const BY_SIZE_CF: &str = "files_by_size";

/// One catalog row: a local file with its whole-file hash and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path as recorded by the indexer, absolute or relative to the
    /// deduplication root.
    pub path: PathBuf,
    /// Whole-file content hash, opaque to the matcher.
    pub hash: FileHash,
    /// File size in bytes.
    pub size: u64,
}

/// Read access to the file catalog, keyed by size.
///
/// The matcher asks for every file of a given size; ordering within the
/// returned list follows catalog insertion (path) order and carries no
/// meaning beyond tie-breaking.
pub trait CandidateSource: Send + Sync {
    /// Returns every catalog entry whose size equals `size`.
    fn by_size(&self, size: u64) -> Result<Vec<CatalogEntry>, StoreError>;
}

/// Catalog read statistics.
#[derive(Debug, Default, Clone)]
pub struct CatalogStats {
    /// Size lookups served.
    pub lookups: u64,
    /// Entries returned across all lookups.
    pub entries_returned: u64,
}

/// RocksDB-backed file catalog.
pub struct FileCatalog {
    db: DB,
    stats: RwLock<CatalogStats>,
}

impl FileCatalog {
    /// Opens the catalog read-write, creating the schema if absent.
    ///
    /// This is the indexer-facing mode; the matcher itself only needs
    /// [`FileCatalog::open_read_only`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, [FILES_CF, BY_SIZE_CF])
            .map_err(|e| StoreError::CatalogUnavailable(e.to_string()))?;

        Ok(Self {
            db,
            stats: RwLock::new(CatalogStats::default()),
        })
    }

    /// Opens the catalog read-only.
    ///
    /// The view is a snapshot as of open time; an indexer appending rows
    /// concurrently is tolerated and its additions simply are not visible
    /// until the catalog is reopened.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let opts = Options::default();
        let db = DB::open_cf_for_read_only(&opts, path, [FILES_CF, BY_SIZE_CF], false)
            .map_err(|e| StoreError::CatalogUnavailable(e.to_string()))?;

        Ok(Self {
            db,
            stats: RwLock::new(CatalogStats::default()),
        })
    }

    /// Inserts or overwrites a catalog row. Indexer-side operation.
    pub fn insert(&self, entry: &CatalogEntry) -> Result<(), StoreError> {
        let path_bytes = path_bytes(&entry.path)?;

        let files = self.cf(FILES_CF)?;
        let by_size = self.cf(BY_SIZE_CF)?;

        let mut value = Vec::with_capacity(8 + entry.hash.as_bytes().len());
        value.extend_from_slice(&entry.size.to_be_bytes());
        value.extend_from_slice(entry.hash.as_bytes());
        self.db
            .put_cf(files, &path_bytes, &value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut size_key = Vec::with_capacity(8 + path_bytes.len());
        size_key.extend_from_slice(&entry.size.to_be_bytes());
        size_key.extend_from_slice(&path_bytes);
        self.db
            .put_cf(by_size, &size_key, entry.hash.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Number of rows in the catalog.
    pub fn len(&self) -> Result<u64, StoreError> {
        let files = self.cf(FILES_CF)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(files, IteratorMode::Start) {
            item.map_err(|e| StoreError::Database(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    /// Returns true when the catalog holds no rows.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Returns read statistics.
    pub fn stats(&self) -> CatalogStats {
        self.stats.read().clone()
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("missing column family {name}")))
    }
}

impl CandidateSource for FileCatalog {
    fn by_size(&self, size: u64) -> Result<Vec<CatalogEntry>, StoreError> {
        let by_size = self.cf(BY_SIZE_CF)?;
        let prefix = size.to_be_bytes();

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(by_size, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let path = String::from_utf8(key[8..].to_vec())
                .map_err(|_| StoreError::InvalidRow("non-utf8 path in size index".into()))?;
            let hash = String::from_utf8(value.to_vec())
                .map_err(|_| StoreError::InvalidRow("non-utf8 hash in size index".into()))?;
            entries.push(CatalogEntry {
                path: PathBuf::from(path),
                hash: FileHash::new(hash),
                size,
            });
        }

        let mut stats = self.stats.write();
        stats.lookups += 1;
        stats.entries_returned += entries.len() as u64;
        debug!(size, candidates = entries.len(), "catalog size lookup");
        Ok(entries)
    }
}

fn path_bytes(path: &Path) -> Result<Vec<u8>, StoreError> {
    path.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| StoreError::InvalidRow(format!("non-utf8 path {}", path.display())))
}

/// In-memory catalog for tests and embedders that already hold an index.
#[derive(Default)]
pub struct MemoryCatalog {
    by_size: RwLock<BTreeMap<u64, Vec<CatalogEntry>>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn insert(&self, entry: CatalogEntry) {
        self.by_size
            .write()
            .entry(entry.size)
            .or_default()
            .push(entry);
    }
}

impl CandidateSource for MemoryCatalog {
    fn by_size(&self, size: u64) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self
            .by_size
            .read()
            .get(&size)
            .cloned()
            .unwrap_or_default())
    }
}
