//! Seedmatch Engine - Finds local files whose bytes match torrent entries.
//!
//! Given a decoded torrent descriptor and a catalog of locally indexed
//! files, the engine reports, per torrent entry, every local path whose
//! content is bit-identical under the torrent's SHA-1 piece layout. Pieces
//! wholly inside one file are checked independently and in parallel; pieces
//! straddling file boundaries are checked jointly across the candidates of
//! the neighboring entries.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod boundary;
mod candidates;
mod interior;

pub mod hasher;
pub mod matcher;

pub use hasher::{FileSegment, HashError, PieceHasher};
pub use matcher::{MatchOutcome, MatchStats, Matcher, SlotMatch};

use std::path::PathBuf;

use thiserror::Error;

use seedmatch_store::StoreError;

/// Fatal errors from a match run.
///
/// Candidate-level trouble (a file deleted since indexing, a short read)
/// never surfaces here; it eliminates the affected candidate and is logged.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The catalog or piece store failed in a way the match cannot work
    /// around.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A verification task died instead of reporting a result.
    #[error("verification task failed: {0}")]
    Task(String),
}

/// Tunable limits for a match run.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Maximum concurrent range reads across all verification work.
    /// Bounds open file descriptors and keeps spinning media from
    /// thrashing.
    pub max_concurrent_reads: usize,
    /// Optional cap on candidates per torrent entry. Useful when a size
    /// bucket is enormous; surplus candidates past the heuristic order are
    /// dropped with a warning. `None` considers every candidate.
    pub max_candidates_per_slot: Option<usize>,
    /// Ceiling on candidate combinations evaluated per straddling piece.
    /// Past it the piece is skipped and its candidates all survive
    /// (may-match rather than ruled-out).
    pub max_boundary_combinations: usize,
    /// Root against which relative catalog paths are resolved.
    pub dedup_root: Option<PathBuf>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: 8,
            max_candidates_per_slot: None,
            max_boundary_combinations: 10_000,
            dedup_root: None,
        }
    }
}
