//! Slot derivation: where each torrent file sits in the piece grid.
//!
//! Pieces are laid over the concatenation of all files, so they do not
//! respect file boundaries. Per file ("slot") we precompute which pieces are
//! wholly contained in it (verifiable from that file alone) and how many
//! bytes its first and last pieces borrow from the neighboring slots. All of
//! the digest-index arithmetic lives here, once, instead of in the
//! verification hot path.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;

use crate::torrent::TorrentDescriptor;

/// The byte range one torrent file occupies in the virtual stream, with its
/// piece coverage and boundary geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Position of the file in the torrent's file list.
    pub index: usize,
    /// Path of the file inside the torrent.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Offset of the first byte in the virtual stream.
    pub offset_start: u64,
    /// Offset one past the last byte (`offset_start + size`).
    pub offset_end: u64,
    /// First piece overlapping this slot. Meaningless when `size == 0`.
    pub first_piece: u32,
    /// Last piece overlapping this slot. Meaningless when `size == 0`.
    pub last_piece: u32,
    /// Bytes of the first piece that lie before this slot (0 iff the slot
    /// starts on a piece boundary).
    pub prefix_len: u64,
    /// Bytes of the last piece that lie after this slot (0 iff the slot
    /// ends on a piece boundary or at the end of the stream).
    pub suffix_len: u64,
    /// Pieces wholly contained in this slot.
    pub interior: Range<u32>,
}

impl Slot {
    /// All pieces overlapping this slot (empty for a zero-length slot).
    pub fn piece_range(&self) -> Range<u32> {
        if self.size == 0 {
            0..0
        } else {
            self.first_piece..self.last_piece + 1
        }
    }

    /// Pieces wholly contained in this slot.
    pub fn interior_pieces(&self) -> Range<u32> {
        self.interior.clone()
    }

    /// The leading piece shared with preceding slots, if any.
    pub fn leading_boundary(&self) -> Option<u32> {
        (self.size > 0 && self.prefix_len > 0).then_some(self.first_piece)
    }

    /// The trailing piece shared with following slots, if any.
    pub fn trailing_boundary(&self) -> Option<u32> {
        (self.size > 0 && self.suffix_len > 0).then_some(self.last_piece)
    }

    /// Offset of piece `piece` relative to the start of this slot's file.
    ///
    /// Only meaningful for pieces that start inside the slot (interior
    /// pieces and a trailing boundary piece).
    pub fn piece_offset_in_file(&self, piece: u32, piece_length: u32) -> u64 {
        (piece as u64 * piece_length as u64).saturating_sub(self.offset_start)
    }

    /// True when the slot begins exactly on a piece boundary.
    ///
    /// Aligned slots carve their interior pieces on the file's own piece
    /// grid, which is what makes their digests reusable across torrents
    /// with the same piece length.
    pub fn is_aligned(&self) -> bool {
        self.prefix_len == 0
    }
}

/// Derives the ordered slot sequence for a torrent.
///
/// Guarantees `slots[i].offset_end == slots[i + 1].offset_start`, that every
/// piece is either interior to exactly one slot or shared by the consecutive
/// slots it straddles, and that a final short piece inside the last file
/// counts as interior (it needs no neighbor to verify).
pub fn build_slots(descriptor: &TorrentDescriptor) -> Vec<Slot> {
    let piece_length = descriptor.piece_length() as u64;
    let total = descriptor.total_length();

    let mut slots = Vec::with_capacity(descriptor.files().len());
    let mut offset = 0u64;

    for (index, file) in descriptor.files().iter().enumerate() {
        let offset_start = offset;
        let offset_end = offset_start + file.length;
        offset = offset_end;

        if file.length == 0 {
            slots.push(Slot {
                index,
                path: file.path.clone(),
                size: 0,
                offset_start,
                offset_end,
                first_piece: (offset_start / piece_length) as u32,
                last_piece: (offset_start / piece_length) as u32,
                prefix_len: 0,
                suffix_len: 0,
                interior: 0..0,
            });
            continue;
        }

        let first_piece = (offset_start / piece_length) as u32;
        let last_piece = ((offset_end - 1) / piece_length) as u32;
        let prefix_len = offset_start % piece_length;
        // The last piece's true end is clamped to the stream end, so the
        // short final piece of a torrent never borrows from a neighbor.
        let last_piece_end = ((last_piece as u64 + 1) * piece_length).min(total);
        let suffix_len = last_piece_end - offset_end;

        let interior_start = if prefix_len == 0 {
            first_piece
        } else {
            first_piece + 1
        };
        let interior_end = if suffix_len == 0 {
            last_piece + 1
        } else {
            last_piece
        };
        let interior = interior_start..interior_end.max(interior_start);

        slots.push(Slot {
            index,
            path: file.path.clone(),
            size: file.length,
            offset_start,
            offset_end,
            first_piece,
            last_piece,
            prefix_len,
            suffix_len,
            interior,
        });
    }

    slots
}

/// One piece that straddles a file boundary, together with the contiguous
/// run of slots it touches.
///
/// Most spans cover two slots (tail of one file, head of the next). When
/// files are smaller than the piece length a single piece can swallow whole
/// files, so a span may cover any number of consecutive slots; the middle
/// ones contribute their entire content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundarySpan {
    /// The straddling piece.
    pub piece: u32,
    /// Contiguous range of slot indices the piece overlaps. Zero-length
    /// slots inside the range contribute no bytes.
    pub slots: Range<usize>,
}

/// Enumerates the cross-file pieces of a torrent, in piece order.
///
/// Zero-length slots never participate: they contribute no bytes.
pub fn boundary_spans(slots: &[Slot]) -> Vec<BoundarySpan> {
    let mut by_piece: BTreeMap<u32, (usize, usize)> = BTreeMap::new();

    for slot in slots {
        for piece in [slot.leading_boundary(), slot.trailing_boundary()]
            .into_iter()
            .flatten()
        {
            let entry = by_piece.entry(piece).or_insert((slot.index, slot.index));
            entry.0 = entry.0.min(slot.index);
            entry.1 = entry.1.max(slot.index);
        }
    }

    by_piece
        .into_iter()
        .map(|(piece, (lo, hi))| {
            debug_assert!(lo < hi, "boundary piece {piece} confined to one slot");
            BoundarySpan {
                piece,
                slots: lo..hi + 1,
            }
        })
        .collect()
}
