//! Test fixture: an on-disk file tree, a seeded catalog, and a matcher
//! wired the way an embedder would wire it (read-only catalog view,
//! durable piece-hash store).

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::TempDir;

use seedmatch_core::{sha1_digest, FileHash, TorrentDescriptor, TorrentFile};
use seedmatch_engine::{MatchConfig, Matcher};
use seedmatch_store::{CatalogEntry, FileCatalog, PieceHashStore};

/// Initialize tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("seedmatch_engine=debug,seedmatch_store=debug")
        .with_test_writer()
        .try_init();
}

/// Deterministic pseudo-random content for fixture files.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Builds a descriptor by hashing the concatenation of the given file
/// contents, exactly as the torrent's creator would have.
pub fn torrent(piece_length: u32, files: &[(&str, &[u8])]) -> TorrentDescriptor {
    let stream: Vec<u8> = files
        .iter()
        .flat_map(|(_, content)| content.iter().copied())
        .collect();
    let digests: Vec<u8> = stream
        .chunks(piece_length as usize)
        .flat_map(|chunk| sha1_digest(chunk).0)
        .collect();
    let entries = files
        .iter()
        .map(|(name, content)| TorrentFile::new(*name, content.len() as u64))
        .collect();
    TorrentDescriptor::new(piece_length, digests, entries)
        .expect("fixture torrent must be well-formed")
}

/// A local file tree plus the stores the matcher runs against.
///
/// Files are indexed as the deduplication side would index them: path,
/// whole-file hash (SHA-1 of the content here), and size. `matcher()`
/// flushes pending rows into a catalog database and opens it read-only.
pub struct Fixture {
    /// Root of the fixture file tree.
    pub files: TempDir,
    store: TempDir,
    entries: Vec<CatalogEntry>,
    /// Piece-hash store shared by every matcher built from this fixture.
    pub pieces: Arc<PieceHashStore>,
}

impl Fixture {
    /// Creates an empty fixture with a durable piece-hash store.
    pub fn new() -> Self {
        let store = TempDir::new().expect("create store dir");
        let pieces =
            Arc::new(PieceHashStore::open(&store.path().join("pieces")).expect("open piece store"));
        Self {
            files: TempDir::new().expect("create files dir"),
            store,
            entries: Vec::new(),
            pieces,
        }
    }

    /// Writes a file into the tree and indexes it under its absolute path.
    pub fn index_file(&mut self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.write(name, content);
        self.entries.push(CatalogEntry {
            path: path.clone(),
            hash: FileHash::new(sha1_digest(content).to_hex()),
            size: content.len() as u64,
        });
        path
    }

    /// Writes a file and indexes it under its tree-relative path, leaving
    /// resolution to the matcher's deduplication root.
    pub fn index_relative(&mut self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.write(name, content);
        self.entries.push(CatalogEntry {
            path: PathBuf::from(name),
            hash: FileHash::new(sha1_digest(content).to_hex()),
            size: content.len() as u64,
        });
        path
    }

    /// Indexes a row whose file does not exist on disk.
    pub fn index_phantom(&mut self, name: &str, size: u64) {
        self.entries.push(CatalogEntry {
            path: self.files.path().join(name),
            hash: FileHash::new(format!("phantom-{name}")),
            size,
        });
    }

    /// Builds a matcher over a read-only view of the indexed rows.
    pub fn matcher(&self) -> Matcher {
        self.matcher_with(MatchConfig::default())
    }

    /// Builds a matcher with explicit configuration. The deduplication
    /// root defaults to the fixture tree unless the config sets one.
    pub fn matcher_with(&self, mut config: MatchConfig) -> Matcher {
        let catalog_path = self.store.path().join("catalog");
        {
            let catalog = FileCatalog::open(&catalog_path).expect("open catalog for seeding");
            for entry in &self.entries {
                catalog.insert(entry).expect("seed catalog row");
            }
        }
        let catalog = FileCatalog::open_read_only(&catalog_path).expect("open catalog read-only");

        if config.dedup_root.is_none() {
            config.dedup_root = Some(self.files.path().to_path_buf());
        }
        Matcher::new(Arc::new(catalog), self.pieces.clone(), config)
    }

    fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.files.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dirs");
        }
        std::fs::write(&path, content).expect("write fixture file");
        path
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
