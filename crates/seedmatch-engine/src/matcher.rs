//! The match orchestrator.
//!
//! Drives a full run: derive slots, pull size-matched candidates from the
//! catalog, verify interior pieces across all (slot, candidate) pairs in
//! parallel, join straddling pieces across neighbors, then report per-entry
//! locations. Digests computed along the way are committed to the
//! piece-hash store after verification finishes, so a later match over the
//! same files skips the disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info};

use seedmatch_core::{boundary_spans, build_slots, FileHash, PieceDigest, TorrentDescriptor};
use seedmatch_store::{CandidateSource, CatalogEntry, PieceHashStore};

use crate::boundary::join_boundaries;
use crate::candidates::slot_candidates;
use crate::hasher::PieceHasher;
use crate::interior::verify_interior;
use crate::{MatchConfig, MatchError};

/// Match result for one torrent entry.
#[derive(Debug, Clone, Serialize)]
pub struct SlotMatch {
    /// Path of the entry inside the torrent.
    pub path: PathBuf,
    /// Entry size in bytes.
    pub size: u64,
    /// Local files whose content matches the entry, in candidate order.
    /// Empty means no local match.
    pub locations: Vec<PathBuf>,
}

/// Counters from one match run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MatchStats {
    /// Candidates pulled from the catalog across all entries.
    pub candidates_considered: u64,
    /// Candidates accepted into some entry's locations.
    pub candidates_accepted: u64,
    /// Range reads issued against local files.
    pub ranges_read: u64,
    /// Interior pieces served from the piece-hash store.
    pub cache_digests_used: u64,
    /// Pieces that straddle entries and went through the joint check.
    pub boundary_pieces: u64,
    /// Straddling pieces skipped over the combination cap.
    pub boundary_overflows: u64,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: u64,
}

/// Everything a match run produces.
#[derive(Debug)]
pub struct MatchOutcome {
    /// One result per torrent entry, in torrent order.
    pub matches: Vec<SlotMatch>,
    /// Run counters.
    pub stats: MatchStats,
}

/// Matches torrents against the local file catalog.
pub struct Matcher {
    source: Arc<dyn CandidateSource>,
    pieces: Arc<PieceHashStore>,
    hasher: Arc<PieceHasher>,
    config: MatchConfig,
}

impl Matcher {
    /// Creates a matcher over a catalog view and a piece-hash store.
    pub fn new(
        source: Arc<dyn CandidateSource>,
        pieces: Arc<PieceHashStore>,
        config: MatchConfig,
    ) -> Self {
        let hasher = Arc::new(PieceHasher::new(config.max_concurrent_reads));
        Self {
            source,
            pieces,
            hasher,
            config,
        }
    }

    /// The shared range hasher, exposing its read counter.
    pub fn hasher(&self) -> &Arc<PieceHasher> {
        &self.hasher
    }

    /// Finds, for every file in the torrent, the local files whose content
    /// is bit-identical under the torrent's piece layout.
    ///
    /// Results follow the torrent's file order; within an entry, locations
    /// follow the candidate heuristic order. The underlying files are
    /// assumed not to change for the duration of the run.
    pub async fn match_torrent(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<MatchOutcome, MatchError> {
        let started = Instant::now();
        let reads_before = self.hasher.ranges_read();

        let descriptor = Arc::new(descriptor.clone());
        let slots = build_slots(&descriptor);
        info!(
            files = slots.len(),
            bytes = descriptor.total_length(),
            pieces = descriptor.piece_count(),
            "matching torrent against catalog"
        );

        let mut stats = MatchStats::default();

        let mut per_slot: Vec<Vec<CatalogEntry>> = Vec::with_capacity(slots.len());
        for slot in &slots {
            let found = slot_candidates(
                self.source.as_ref(),
                slot,
                self.config.dedup_root.as_deref(),
                self.config.max_candidates_per_slot,
            )
            .await?;
            stats.candidates_considered += found.len() as u64;
            debug!(
                entry = %slot.path.display(),
                size = slot.size,
                candidates = found.len(),
                "resolved candidates"
            );
            per_slot.push(found);
        }

        // Interior verification, all (slot, candidate) pairs at once. The
        // read semaphore inside the hasher is the real throttle.
        let mut join = JoinSet::new();
        for (si, slot) in slots.iter().enumerate() {
            if slot.size == 0 {
                // Zero-length entries match every zero-length file; there
                // are no bytes to check.
                continue;
            }
            for (ci, candidate) in per_slot[si].iter().enumerate() {
                let task = verify_interior(
                    self.hasher.clone(),
                    self.pieces.clone(),
                    descriptor.clone(),
                    slot.clone(),
                    candidate.clone(),
                );
                join.spawn(async move { (si, ci, task.await) });
            }
        }

        let mut keep: Vec<Vec<bool>> = per_slot.iter().map(|c| vec![true; c.len()]).collect();
        let mut write_back: HashMap<FileHash, HashMap<u32, PieceDigest>> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            let (si, ci, outcome) = joined.map_err(|e| MatchError::Task(e.to_string()))?;
            stats.cache_digests_used += outcome.cache_hits;
            if outcome.matched {
                if !outcome.computed.is_empty() {
                    write_back
                        .entry(per_slot[si][ci].hash.clone())
                        .or_default()
                        .extend(outcome.computed);
                }
            } else {
                keep[si][ci] = false;
            }
        }

        let mut survivors: Vec<Vec<CatalogEntry>> = per_slot
            .into_iter()
            .zip(&keep)
            .map(|(entries, keep)| {
                entries
                    .into_iter()
                    .zip(keep)
                    .filter_map(|(entry, &k)| k.then_some(entry))
                    .collect()
            })
            .collect();

        let spans = boundary_spans(&slots);
        let boundary = join_boundaries(
            &self.hasher,
            &descriptor,
            &slots,
            &spans,
            &mut survivors,
            self.config.max_boundary_combinations,
        )
        .await;
        stats.boundary_pieces = boundary.pieces_joined;
        stats.boundary_overflows = boundary.overflows;

        // Verification is done; only now do the fresh digests go durable.
        for (hash, digests) in write_back {
            self.pieces
                .store(&hash, descriptor.piece_length(), &digests);
        }

        let matches: Vec<SlotMatch> = slots
            .iter()
            .map(|slot| SlotMatch {
                path: slot.path.clone(),
                size: slot.size,
                locations: survivors[slot.index]
                    .iter()
                    .map(|entry| entry.path.clone())
                    .collect(),
            })
            .collect();

        stats.candidates_accepted = matches.iter().map(|m| m.locations.len() as u64).sum();
        stats.ranges_read = self.hasher.ranges_read() - reads_before;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            entries = matches.len(),
            matched_entries = matches.iter().filter(|m| !m.locations.is_empty()).count(),
            accepted = stats.candidates_accepted,
            considered = stats.candidates_considered,
            ranges_read = stats.ranges_read,
            cache_digests = stats.cache_digests_used,
            elapsed_ms = stats.elapsed_ms,
            "match complete"
        );

        Ok(MatchOutcome { matches, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use seedmatch_core::{sha1_digest, TorrentFile};
    use seedmatch_store::MemoryCatalog;
    use tempfile::TempDir;

    fn piece_digests(stream: &[u8], piece_length: usize) -> Vec<u8> {
        stream
            .chunks(piece_length)
            .flat_map(|chunk| sha1_digest(chunk).0)
            .collect()
    }

    struct Setup {
        dir: TempDir,
        catalog: Arc<MemoryCatalog>,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                catalog: Arc::new(MemoryCatalog::new()),
            }
        }

        fn add_file(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            self.catalog.insert(CatalogEntry {
                path: path.clone(),
                hash: seedmatch_core::FileHash::new(format!("hash-{name}")),
                size: content.len() as u64,
            });
            path
        }

        fn matcher(&self) -> Matcher {
            Matcher::new(
                self.catalog.clone(),
                Arc::new(PieceHashStore::in_memory()),
                MatchConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn single_file_exact_match() {
        let setup = Setup::new();
        let content: Vec<u8> = (0..3 * 64 + 17).map(|i| (i % 251) as u8).collect();
        let path = setup.add_file("a.bin", &content);

        let descriptor = TorrentDescriptor::single_file(
            "a.bin",
            content.len() as u64,
            64,
            piece_digests(&content, 64),
        )
        .unwrap();

        let outcome = setup.matcher().match_torrent(&descriptor).await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].locations, vec![path]);
        assert_eq!(outcome.stats.candidates_accepted, 1);
    }

    #[tokio::test]
    async fn flipped_byte_yields_no_match() {
        let setup = Setup::new();
        let mut content: Vec<u8> = (0..3 * 64 + 17).map(|i| (i % 251) as u8).collect();
        let descriptor = TorrentDescriptor::single_file(
            "a.bin",
            content.len() as u64,
            64,
            piece_digests(&content, 64),
        )
        .unwrap();

        // The on-disk copy differs in one byte at the piece-1 boundary.
        content[64] ^= 0x01;
        setup.add_file("a.bin", &content);

        let outcome = setup.matcher().match_torrent(&descriptor).await.unwrap();
        assert!(outcome.matches[0].locations.is_empty());
    }

    #[tokio::test]
    async fn zero_length_entry_matches_every_empty_file() {
        let setup = Setup::new();
        let empty1 = setup.add_file("one.empty", b"");
        let empty2 = setup.add_file("two.empty", b"");
        let content = vec![5u8; 64];
        let data = setup.add_file("data.bin", &content);

        let descriptor = TorrentDescriptor::new(
            64,
            piece_digests(&content, 64),
            vec![
                TorrentFile::new("data.bin", 64),
                TorrentFile::new("marker", 0),
            ],
        )
        .unwrap();

        let outcome = setup.matcher().match_torrent(&descriptor).await.unwrap();
        assert_eq!(outcome.matches[0].locations, vec![data]);
        let mut empties = outcome.matches[1].locations.clone();
        empties.sort();
        let mut expected = vec![empty1, empty2];
        expected.sort();
        assert_eq!(empties, expected);
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_served_from_cache() {
        let setup = Setup::new();
        let content: Vec<u8> = (0..400u32).map(|i| (i % 256) as u8).collect();
        setup.add_file("a.bin", &content);

        let descriptor = TorrentDescriptor::single_file(
            "a.bin",
            content.len() as u64,
            64,
            piece_digests(&content, 64),
        )
        .unwrap();

        let pieces = Arc::new(PieceHashStore::in_memory());
        let first = Matcher::new(
            setup.catalog.clone(),
            pieces.clone(),
            MatchConfig::default(),
        );
        let first_outcome = first.match_torrent(&descriptor).await.unwrap();
        assert!(first_outcome.stats.ranges_read > 0);

        let second = Matcher::new(setup.catalog.clone(), pieces, MatchConfig::default());
        let second_outcome = second.match_torrent(&descriptor).await.unwrap();

        assert_eq!(
            first_outcome.matches[0].locations,
            second_outcome.matches[0].locations
        );
        assert_eq!(second_outcome.stats.ranges_read, 0);
        assert_eq!(second_outcome.stats.cache_digests_used, 7);
    }

    #[tokio::test]
    async fn locations_follow_candidate_order() {
        let setup = Setup::new();
        let content = vec![3u8; 128];
        // Same bytes under three names; the basename match leads.
        let other1 = setup.add_file("copy-1.bin", &content);
        let exact = setup.add_file("a.bin", &content);
        let other2 = setup.add_file("copy-2.bin", &content);

        let descriptor = TorrentDescriptor::single_file(
            "a.bin",
            content.len() as u64,
            64,
            piece_digests(&content, 64),
        )
        .unwrap();

        let outcome = setup.matcher().match_torrent(&descriptor).await.unwrap();
        assert_eq!(
            outcome.matches[0].locations,
            vec![exact, other1, other2]
        );
    }
}
