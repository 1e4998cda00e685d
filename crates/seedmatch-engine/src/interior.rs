//! Interior verification: pieces wholly contained in one slot.
//!
//! Each (slot, candidate) pair verifies independently. Digests come from
//! the piece-hash store when the slot starts on a piece boundary (only then
//! do the torrent's pieces land on the file's own piece grid, making cached
//! digests reusable); everything else is hashed from disk under the global
//! read cap. The first mismatching piece eliminates the candidate and
//! aborts its remaining piece tasks, best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use seedmatch_core::{PieceDigest, Slot, TorrentDescriptor};
use seedmatch_store::{CatalogEntry, PieceHashStore};

use crate::hasher::PieceHasher;

/// Result of interior verification for one candidate.
pub(crate) struct InteriorOutcome {
    /// True when every interior piece matched (or there were none).
    pub matched: bool,
    /// Freshly computed digests on the file's own piece grid, keyed by
    /// file-local piece index. Empty for unaligned slots.
    pub computed: HashMap<u32, PieceDigest>,
    /// Interior pieces served from the piece-hash store.
    pub cache_hits: u64,
}

impl InteriorOutcome {
    fn pass_through() -> Self {
        Self {
            matched: true,
            computed: HashMap::new(),
            cache_hits: 0,
        }
    }

    fn eliminated() -> Self {
        Self {
            matched: false,
            computed: HashMap::new(),
            cache_hits: 0,
        }
    }
}

/// Verifies every interior piece of `slot` against `candidate`.
pub(crate) async fn verify_interior(
    hasher: Arc<PieceHasher>,
    pieces: Arc<PieceHashStore>,
    descriptor: Arc<TorrentDescriptor>,
    slot: Slot,
    candidate: CatalogEntry,
) -> InteriorOutcome {
    let interior = slot.interior_pieces();
    if interior.is_empty() {
        // Every piece of this slot borrows from a neighbor; the boundary
        // join is the only check that can rule the candidate out.
        return InteriorOutcome::pass_through();
    }

    let piece_length = descriptor.piece_length();
    let aligned = slot.is_aligned();
    let cached = if aligned {
        pieces.lookup(&candidate.hash, piece_length)
    } else {
        HashMap::new()
    };

    let mut cache_hits = 0u64;
    let mut join = JoinSet::new();
    for piece in interior {
        let offset = slot.piece_offset_in_file(piece, piece_length);
        let length = descriptor.piece_size(piece);
        let Some(expected) = descriptor.piece_digest(piece) else {
            // A validated descriptor has a digest for every piece.
            continue;
        };

        let local_index = (offset / piece_length as u64) as u32;
        if aligned {
            if let Some(&known) = cached.get(&local_index) {
                if known == expected {
                    cache_hits += 1;
                    continue;
                }
                debug!(
                    candidate = %candidate.path.display(),
                    piece,
                    "cached digest differs from torrent, eliminating"
                );
                return InteriorOutcome::eliminated();
            }
        }

        let hasher = hasher.clone();
        let path = candidate.path.clone();
        join.spawn(async move {
            hasher
                .hash_range(&path, offset, length)
                .await
                .map(|digest| (local_index, digest, expected))
        });
    }

    let mut computed = HashMap::new();
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok(Ok((local_index, digest, expected))) => {
                if digest != expected {
                    debug!(
                        candidate = %candidate.path.display(),
                        "piece digest mismatch, eliminating"
                    );
                    // Dropping the set aborts the candidate's remaining
                    // piece tasks; reads already in flight drain unused.
                    return InteriorOutcome::eliminated();
                }
                if aligned {
                    computed.insert(local_index, digest);
                }
            }
            Ok(Err(e)) => {
                warn!(
                    candidate = %candidate.path.display(),
                    error = %e,
                    "read failed, eliminating candidate"
                );
                return InteriorOutcome::eliminated();
            }
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                warn!(error = %e, "piece hash task failed, eliminating candidate");
                return InteriorOutcome::eliminated();
            }
        }
    }

    InteriorOutcome {
        matched: true,
        computed,
        cache_hits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use seedmatch_core::{build_slots, sha1_digest, FileHash, TorrentFile};
    use tempfile::TempDir;

    fn piece_digests(stream: &[u8], piece_length: usize) -> Vec<u8> {
        stream
            .chunks(piece_length)
            .flat_map(|chunk| sha1_digest(chunk).0)
            .collect()
    }

    fn single_file_setup(
        dir: &TempDir,
        content: &[u8],
        piece_length: u32,
    ) -> (Arc<TorrentDescriptor>, Slot, CatalogEntry) {
        let path = dir.path().join("a.bin");
        std::fs::write(&path, content).unwrap();

        let descriptor = TorrentDescriptor::single_file(
            "a.bin",
            content.len() as u64,
            piece_length,
            piece_digests(content, piece_length as usize),
        )
        .unwrap();
        let slot = build_slots(&descriptor).remove(0);
        let candidate = CatalogEntry {
            path,
            hash: FileHash::new("cand-a"),
            size: content.len() as u64,
        };
        (Arc::new(descriptor), slot, candidate)
    }

    #[tokio::test]
    async fn matching_candidate_passes_and_reports_digests() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let (descriptor, slot, candidate) = single_file_setup(&dir, &content, 64);

        let outcome = verify_interior(
            Arc::new(PieceHasher::new(4)),
            Arc::new(PieceHashStore::in_memory()),
            descriptor,
            slot,
            candidate,
        )
        .await;

        assert!(outcome.matched);
        // 200 bytes under 64-byte pieces: 4 interior pieces, all computed.
        assert_eq!(outcome.computed.len(), 4);
        assert_eq!(outcome.computed[&0], sha1_digest(&content[..64]));
        assert_eq!(outcome.computed[&3], sha1_digest(&content[192..]));
    }

    #[tokio::test]
    async fn corrupt_byte_eliminates() {
        let dir = TempDir::new().unwrap();
        let mut content: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let (descriptor, slot, _) = single_file_setup(&dir, &content, 64);

        // Same torrent, candidate with one flipped byte in piece 1.
        content[64] ^= 0xFF;
        let bad = dir.path().join("bad.bin");
        std::fs::write(&bad, &content).unwrap();
        let candidate = CatalogEntry {
            path: bad,
            hash: FileHash::new("cand-bad"),
            size: content.len() as u64,
        };

        let outcome = verify_interior(
            Arc::new(PieceHasher::new(4)),
            Arc::new(PieceHashStore::in_memory()),
            descriptor,
            slot,
            candidate,
        )
        .await;
        assert!(!outcome.matched);
    }

    #[tokio::test]
    async fn cached_digests_skip_all_reads() {
        let dir = TempDir::new().unwrap();
        let content = vec![42u8; 256];
        let (descriptor, slot, candidate) = single_file_setup(&dir, &content, 64);

        let pieces = Arc::new(PieceHashStore::in_memory());
        let first = verify_interior(
            Arc::new(PieceHasher::new(4)),
            pieces.clone(),
            descriptor.clone(),
            slot.clone(),
            candidate.clone(),
        )
        .await;
        assert!(first.matched);
        pieces.store(&candidate.hash, 64, &first.computed);

        let hasher = Arc::new(PieceHasher::new(4));
        let second = verify_interior(hasher.clone(), pieces, descriptor, slot, candidate).await;
        assert!(second.matched);
        assert_eq!(second.cache_hits, 4);
        assert_eq!(hasher.ranges_read(), 0);
    }

    #[tokio::test]
    async fn cached_mismatch_eliminates_without_reading() {
        let dir = TempDir::new().unwrap();
        let content = vec![42u8; 128];
        let (descriptor, slot, candidate) = single_file_setup(&dir, &content, 64);

        // Seed the cache with digests of different content for this hash.
        let pieces = Arc::new(PieceHashStore::in_memory());
        let wrong: HashMap<u32, PieceDigest> =
            [(0, sha1_digest(b"other")), (1, sha1_digest(b"bytes"))].into();
        pieces.store(&candidate.hash, 64, &wrong);

        let hasher = Arc::new(PieceHasher::new(4));
        let outcome = verify_interior(hasher.clone(), pieces, descriptor, slot, candidate).await;
        assert!(!outcome.matched);
        assert_eq!(hasher.ranges_read(), 0);
    }

    #[tokio::test]
    async fn unaligned_slot_skips_the_cache() {
        let dir = TempDir::new().unwrap();
        // Two files; the second starts mid-piece, so its interior pieces do
        // not sit on its own piece grid.
        let f0 = vec![1u8; 40];
        let f1: Vec<u8> = (0..150u32).map(|i| i as u8).collect();
        let stream: Vec<u8> = f0.iter().chain(f1.iter()).copied().collect();

        let f1_path = dir.path().join("f1.bin");
        std::fs::write(&f1_path, &f1).unwrap();

        let descriptor = TorrentDescriptor::new(
            64,
            piece_digests(&stream, 64),
            vec![TorrentFile::new("f0", 40), TorrentFile::new("f1.bin", 150)],
        )
        .unwrap();
        let slot = build_slots(&descriptor).remove(1);
        assert!(!slot.is_aligned());

        let candidate = CatalogEntry {
            path: f1_path,
            hash: FileHash::new("cand-f1"),
            size: 150,
        };
        let outcome = verify_interior(
            Arc::new(PieceHasher::new(4)),
            Arc::new(PieceHashStore::in_memory()),
            Arc::new(descriptor),
            slot,
            candidate,
        )
        .await;

        assert!(outcome.matched);
        assert!(outcome.computed.is_empty());
        assert_eq!(outcome.cache_hits, 0);
    }

    #[tokio::test]
    async fn slot_without_interior_passes_through() {
        let descriptor = TorrentDescriptor::new(
            64,
            piece_digests(&vec![0u8; 80], 64),
            vec![TorrentFile::new("f0", 50), TorrentFile::new("f1", 30)],
        )
        .unwrap();
        let slot = build_slots(&descriptor).remove(0);
        assert!(slot.interior_pieces().is_empty());

        let candidate = CatalogEntry {
            path: PathBuf::from("/does/not/matter"),
            hash: FileHash::new("x"),
            size: 50,
        };
        let outcome = verify_interior(
            Arc::new(PieceHasher::new(4)),
            Arc::new(PieceHashStore::in_memory()),
            Arc::new(descriptor),
            slot,
            candidate,
        )
        .await;
        assert!(outcome.matched);
    }

    #[tokio::test]
    async fn vanished_file_eliminates() {
        let dir = TempDir::new().unwrap();
        let content = vec![9u8; 128];
        let (descriptor, slot, mut candidate) = single_file_setup(&dir, &content, 64);
        candidate.path = dir.path().join("gone.bin");

        let outcome = verify_interior(
            Arc::new(PieceHasher::new(4)),
            Arc::new(PieceHashStore::in_memory()),
            descriptor,
            slot,
            candidate,
        )
        .await;
        assert!(!outcome.matched);
    }
}
