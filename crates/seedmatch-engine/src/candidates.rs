//! Candidate resolution and ordering.
//!
//! The catalog answers "which files have this size"; this module turns that
//! answer into a verification-ready candidate list: paths resolved against
//! the deduplication root, entries whose file vanished since indexing
//! dropped, and the rest ordered so the likeliest matches verify first. The
//! order only influences how soon mismatches are discovered; every
//! candidate is considered regardless.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use seedmatch_core::Slot;
use seedmatch_store::{CandidateSource, CatalogEntry};

use crate::MatchError;

/// Resolves, filters, and orders the candidates for one slot.
pub(crate) async fn slot_candidates(
    source: &dyn CandidateSource,
    slot: &Slot,
    dedup_root: Option<&Path>,
    cap: Option<usize>,
) -> Result<Vec<CatalogEntry>, MatchError> {
    let mut resolved = Vec::new();
    for entry in source.by_size(slot.size)? {
        let CatalogEntry { path, hash, size } = entry;
        let path = resolve_path(path, dedup_root);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() == size => resolved.push(CatalogEntry { path, hash, size }),
            Ok(_) => {
                debug!(path = %path.display(), "file size changed since indexing, skipping")
            }
            Err(_) => debug!(path = %path.display(), "catalogued file missing, skipping"),
        }
    }

    order_candidates(slot, &mut resolved);

    if let Some(cap) = cap {
        if resolved.len() > cap {
            warn!(
                slot = slot.index,
                candidates = resolved.len(),
                cap,
                "candidate cap exceeded, dropping the tail of the heuristic order"
            );
            resolved.truncate(cap);
        }
    }
    Ok(resolved)
}

fn resolve_path(path: PathBuf, dedup_root: Option<&Path>) -> PathBuf {
    match dedup_root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}

/// Stable heuristic order: exact basename match first, then longest common
/// basename substring, catalog order breaking ties.
fn order_candidates(slot: &Slot, entries: &mut [CatalogEntry]) {
    let target = basename(&slot.path);
    entries.sort_by_cached_key(|entry| {
        let base = basename(&entry.path);
        (base != target, Reverse(common_substring_len(&base, &target)))
    });
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Length of the longest common substring of two (short) names.
fn common_substring_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut best = 0;
    let mut row = vec![0usize; b.len() + 1];
    for &ca in &a {
        let mut prev_diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let up = row[j + 1];
            row[j + 1] = if ca == cb { prev_diag + 1 } else { 0 };
            best = best.max(row[j + 1]);
            prev_diag = up;
        }
    }
    best
}
