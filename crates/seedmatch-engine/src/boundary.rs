//! Joint verification of pieces that straddle file boundaries.
//!
//! A straddling piece only hashes correctly for a *combination* of
//! candidates, one per slot it overlaps. Each candidate's contribution is
//! read once; SHA-1 contexts are then cloned down the combination tree, so
//! a shared prefix of candidates is hashed a single time no matter how many
//! extensions are tried. A candidate survives a piece iff it appears in at
//! least one combination whose final digest equals the torrent's.
//!
//! Eliminations cascade: shrinking one slot's candidate set can invalidate
//! combinations at the neighboring piece, so evaluation runs over a
//! worklist until no set changes. Candidate sets only ever shrink, which
//! bounds the total work.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use seedmatch_core::{BoundarySpan, PieceDigest, Slot, TorrentDescriptor};
use seedmatch_store::CatalogEntry;

use crate::hasher::PieceHasher;

/// Counters from the boundary pass.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BoundaryStats {
    /// Straddling pieces evaluated at least once.
    pub pieces_joined: u64,
    /// Pieces skipped because the combination count exceeded the cap;
    /// their candidates were kept unverified.
    pub overflows: u64,
}

/// Runs every straddling piece to a fixed point, shrinking `candidates`
/// (indexed by slot) in place.
pub(crate) async fn join_boundaries(
    hasher: &PieceHasher,
    descriptor: &TorrentDescriptor,
    slots: &[Slot],
    spans: &[BoundarySpan],
    candidates: &mut [Vec<CatalogEntry>],
    max_combinations: usize,
) -> BoundaryStats {
    let mut stats = BoundaryStats::default();

    // Which spans read from which slot, for re-queueing after elimination.
    let mut spans_of_slot: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut members_of_span: Vec<Vec<usize>> = Vec::with_capacity(spans.len());
    for (si, span) in spans.iter().enumerate() {
        let members: Vec<usize> = span
            .slots
            .clone()
            .filter(|&s| slots[s].size > 0)
            .collect();
        for &s in &members {
            spans_of_slot.entry(s).or_default().push(si);
        }
        members_of_span.push(members);
    }

    let mut evaluated = vec![false; spans.len()];
    let mut dirty: BTreeSet<usize> = (0..spans.len()).collect();
    // One read per (piece, slot, candidate) across all passes.
    let mut contributions: HashMap<(u32, usize, PathBuf), Arc<Vec<u8>>> = HashMap::new();

    while let Some(si) = dirty.pop_first() {
        let span = &spans[si];
        let members = &members_of_span[si];
        if !evaluated[si] {
            evaluated[si] = true;
            stats.pieces_joined += 1;
        }

        let mut shrunk: Vec<usize> = Vec::new();

        // Load each surviving candidate's contribution, dropping candidates
        // whose file can no longer be read.
        for &s in members {
            let (offset, length) = contribution(&slots[s], span.piece, descriptor);
            let before = candidates[s].len();
            let mut kept = Vec::with_capacity(before);
            for entry in candidates[s].drain(..) {
                let key = (span.piece, s, entry.path.clone());
                if !contributions.contains_key(&key) {
                    match hasher.read_range(&entry.path, offset, length).await {
                        Ok(bytes) => {
                            contributions.insert(key, Arc::new(bytes));
                        }
                        Err(e) => {
                            warn!(
                                candidate = %entry.path.display(),
                                error = %e,
                                "read failed at boundary, eliminating candidate"
                            );
                            continue;
                        }
                    }
                }
                kept.push(entry);
            }
            if kept.len() != before {
                shrunk.push(s);
            }
            candidates[s] = kept;
        }

        let combination_count = members
            .iter()
            .fold(1u128, |n, &s| n.saturating_mul(candidates[s].len() as u128));

        if combination_count == 0 {
            // A slot with no candidates leaves the piece unmatchable; no
            // neighbor can survive it either.
            for &s in members {
                if !candidates[s].is_empty() {
                    candidates[s].clear();
                    shrunk.push(s);
                }
            }
        } else if combination_count > max_combinations as u128 {
            warn!(
                piece = span.piece,
                combinations = combination_count,
                cap = max_combinations,
                "boundary join too large, keeping its candidates unverified"
            );
            stats.overflows += 1;
        } else if let Some(expected) = descriptor.piece_digest(span.piece) {
            let levels: Vec<Vec<Arc<Vec<u8>>>> = members
                .iter()
                .map(|&s| {
                    candidates[s]
                        .iter()
                        .map(|entry| {
                            Arc::clone(&contributions[&(span.piece, s, entry.path.clone())])
                        })
                        .collect()
                })
                .collect();

            let mut matched: Vec<Vec<bool>> = members
                .iter()
                .map(|&s| vec![false; candidates[s].len()])
                .collect();
            walk(&Sha1::new(), 0, &levels, &expected, &mut matched, &mut Vec::new());

            for (depth, &s) in members.iter().enumerate() {
                let keep = &matched[depth];
                if keep.iter().all(|&k| k) {
                    continue;
                }
                let mut i = 0;
                candidates[s].retain(|_| {
                    let k = keep[i];
                    i += 1;
                    k
                });
                debug!(
                    piece = span.piece,
                    slot = s,
                    survivors = candidates[s].len(),
                    "boundary join eliminated candidates"
                );
                shrunk.push(s);
            }
        }

        // Neighboring pieces that read a shrunken slot must be re-checked.
        for s in shrunk {
            if let Some(neighbors) = spans_of_slot.get(&s) {
                for &sj in neighbors {
                    if sj != si {
                        dirty.insert(sj);
                    }
                }
            }
        }
    }

    stats
}

/// Byte range of `piece` that falls inside `slot`, as (offset in the
/// slot's file, length).
fn contribution(slot: &Slot, piece: u32, descriptor: &TorrentDescriptor) -> (u64, u64) {
    let start = descriptor.piece_offset(piece).max(slot.offset_start);
    let end = descriptor.piece_end(piece).min(slot.offset_end);
    (start - slot.offset_start, end.saturating_sub(start))
}

/// Depth-first walk over candidate combinations, one SHA-1 context clone
/// per branch. Marks every member of a digest-matching combination.
fn walk(
    ctx: &Sha1,
    depth: usize,
    levels: &[Vec<Arc<Vec<u8>>>],
    expected: &PieceDigest,
    matched: &mut [Vec<bool>],
    stack: &mut Vec<usize>,
) {
    if depth == levels.len() {
        let digest = PieceDigest(ctx.clone().finalize().into());
        if digest == *expected {
            for (d, &ci) in stack.iter().enumerate() {
                matched[d][ci] = true;
            }
        }
        return;
    }
    for (ci, bytes) in levels[depth].iter().enumerate() {
        let mut next = ctx.clone();
        next.update(bytes.as_slice());
        stack.push(ci);
        walk(&next, depth + 1, levels, expected, matched, stack);
        stack.pop();
    }
}
