//! The piece-hash store: durable cache of per-file piece digests.
//!
//! Rows are keyed by `(whole_file_hash, piece_length, piece_index)` where
//! `piece_index` counts pieces from the start of the file itself. A file's
//! digests under a given piece length never change, so insertions are
//! idempotent and concurrent writers cannot disagree.
//!
//! Persistence is best-effort: a failed write is logged and dropped (the
//! next match recomputes), and a row that fails to decode is treated as a
//! miss. Lookups never wait on writes.

use std::collections::HashMap;

use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use seedmatch_core::{FileHash, PieceDigest};
use tracing::{debug, warn};

use crate::StoreError;

/// Column family holding piece-digest rows.
const PIECES_CF: &str = "file_pieces";

/// Statistics for the piece-hash store.
#[derive(Debug, Default, Clone)]
pub struct PieceStoreStats {
    /// Lookup calls served.
    pub lookups: u64,
    /// Digests returned across all lookups.
    pub digests_served: u64,
    /// Rows written to the durable backing.
    pub rows_written: u64,
    /// Writes dropped because the backing store failed.
    pub write_failures: u64,
    /// Rows skipped because they failed to decode.
    pub corrupt_rows: u64,
}

/// Persistent + in-memory cache of `(file, piece_length)` piece digests.
pub struct PieceHashStore {
    db: Option<DB>,
    memory: RwLock<HashMap<(FileHash, u32), HashMap<u32, PieceDigest>>>,
    stats: RwLock<PieceStoreStats>,
}

impl PieceHashStore {
    /// Opens the store at the given path, creating the schema if absent.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, [PIECES_CF])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Some(db),
            memory: RwLock::new(HashMap::new()),
            stats: RwLock::new(PieceStoreStats::default()),
        })
    }

    /// Creates a store with no durable backing.
    ///
    /// Digests live for the lifetime of the process; useful for tests and
    /// one-shot embedders.
    pub fn in_memory() -> Self {
        Self {
            db: None,
            memory: RwLock::new(HashMap::new()),
            stats: RwLock::new(PieceStoreStats::default()),
        }
    }

    /// Returns all known piece digests for a file under a piece length.
    ///
    /// The result is the union of in-memory and persisted rows. Backing
    /// store trouble (unreadable database, corrupt rows) degrades to a
    /// smaller result, never an error: the matcher recomputes what is
    /// missing.
    pub fn lookup(&self, hash: &FileHash, piece_length: u32) -> HashMap<u32, PieceDigest> {
        let mut digests = self.load_durable(hash, piece_length);

        if let Some(cached) = self.memory.read().get(&(hash.clone(), piece_length)) {
            for (&index, &digest) in cached {
                digests.insert(index, digest);
            }
        }

        let mut stats = self.stats.write();
        stats.lookups += 1;
        stats.digests_served += digests.len() as u64;
        digests
    }

    /// Records piece digests for a file under a piece length.
    ///
    /// The in-memory map is updated first so a subsequent `lookup` in this
    /// process observes the digests even if persistence fails.
    pub fn store(
        &self,
        hash: &FileHash,
        piece_length: u32,
        digests: &HashMap<u32, PieceDigest>,
    ) {
        if digests.is_empty() {
            return;
        }

        self.memory
            .write()
            .entry((hash.clone(), piece_length))
            .or_default()
            .extend(digests.iter().map(|(&i, &d)| (i, d)));

        let Some(db) = &self.db else {
            return;
        };
        let Some(cf) = db.cf_handle(PIECES_CF) else {
            warn!(file = %hash, "piece column family missing, dropping digests");
            self.stats.write().write_failures += 1;
            return;
        };

        let mut batch = WriteBatch::default();
        for (&index, digest) in digests {
            batch.put_cf(
                cf,
                row_key(hash, piece_length, index),
                digest.to_hex().as_bytes(),
            );
        }

        match db.write(batch) {
            Ok(()) => {
                let mut stats = self.stats.write();
                stats.rows_written += digests.len() as u64;
                debug!(file = %hash, piece_length, rows = digests.len(), "persisted piece digests");
            }
            Err(e) => {
                // Non-fatal: the digests stay in memory and the next
                // process recomputes them.
                warn!(file = %hash, error = %e, "piece digest write failed, dropping");
                self.stats.write().write_failures += 1;
            }
        }
    }

    /// Returns store statistics.
    pub fn stats(&self) -> PieceStoreStats {
        self.stats.read().clone()
    }

    fn load_durable(&self, hash: &FileHash, piece_length: u32) -> HashMap<u32, PieceDigest> {
        let mut digests = HashMap::new();
        let Some(db) = &self.db else {
            return digests;
        };
        let Some(cf) = db.cf_handle(PIECES_CF) else {
            return digests;
        };

        let prefix = key_prefix(hash, piece_length);
        let iter = db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_slice(), rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    // Unreadable backing storage counts as an empty cache.
                    warn!(file = %hash, error = %e, "piece digest scan failed, treating as miss");
                    self.stats.write().corrupt_rows += 1;
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }

            match decode_row(&key, &prefix, &value) {
                Some((index, digest)) => {
                    digests.insert(index, digest);
                }
                None => {
                    warn!(file = %hash, "corrupt piece digest row skipped");
                    self.stats.write().corrupt_rows += 1;
                }
            }
        }
        digests
    }
}

/// `be16(hash length) || hash || be32(piece_length)`; the length prefix
/// keeps one file's rows from shadowing another's under prefix iteration.
fn key_prefix(hash: &FileHash, piece_length: u32) -> Vec<u8> {
    let hash_bytes = hash.as_bytes();
    let mut key = Vec::with_capacity(2 + hash_bytes.len() + 4);
    key.extend_from_slice(&(hash_bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(hash_bytes);
    key.extend_from_slice(&piece_length.to_be_bytes());
    key
}

fn row_key(hash: &FileHash, piece_length: u32, piece_index: u32) -> Vec<u8> {
    let mut key = key_prefix(hash, piece_length);
    key.extend_from_slice(&piece_index.to_be_bytes());
    key
}

fn decode_row(key: &[u8], prefix: &[u8], value: &[u8]) -> Option<(u32, PieceDigest)> {
    let index_bytes: [u8; 4] = key.get(prefix.len()..)?.try_into().ok()?;
    let hex = std::str::from_utf8(value).ok()?;
    let digest = PieceDigest::from_hex(hex).ok()?;
    Some((u32::from_be_bytes(index_bytes), digest))
}
