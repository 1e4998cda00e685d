//! The decoded torrent descriptor consumed by the matcher.
//!
//! Metainfo parsing happens upstream; this type receives the already-decoded
//! piece length, the concatenated piece digest blob, and the ordered file
//! list, and validates their mutual consistency once at construction.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::{PieceDigest, SHA1_DIGEST_LEN};

/// Errors detected while validating a decoded torrent.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// The piece length was zero.
    #[error("piece length must be positive")]
    ZeroPieceLength,

    /// The digest blob does not hold exactly one digest per piece.
    #[error("piece digest blob holds {actual} bytes, expected {expected} (20 per piece)")]
    DigestLength {
        /// Required blob length for the declared file sizes.
        expected: usize,
        /// Actual blob length.
        actual: usize,
    },
}

/// One file entry in a torrent, in torrent order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    /// Path of the file inside the torrent (relative, joined from the
    /// metainfo path components).
    pub path: PathBuf,
    /// File length in bytes.
    pub length: u64,
}

impl TorrentFile {
    /// Creates a file entry.
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
        }
    }
}

/// Immutable, validated view of a torrent's piece layout.
///
/// The virtual concatenation of all files in order forms a byte stream of
/// length `total_length()`; pieces carve that stream into `piece_length()`
/// sized chunks, the final one possibly shorter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentDescriptor {
    piece_length: u32,
    piece_digests: Bytes,
    files: Vec<TorrentFile>,
}

impl TorrentDescriptor {
    /// Builds a descriptor from decoded metainfo parts.
    ///
    /// Fails if the piece length is zero or the digest blob length is not
    /// 20 bytes per piece of the declared total size.
    pub fn new(
        piece_length: u32,
        piece_digests: impl Into<Bytes>,
        files: Vec<TorrentFile>,
    ) -> Result<Self, TorrentError> {
        if piece_length == 0 {
            return Err(TorrentError::ZeroPieceLength);
        }
        let piece_digests = piece_digests.into();

        let total: u64 = files.iter().map(|f| f.length).sum();
        let piece_count = total.div_ceil(piece_length as u64) as usize;
        let expected = piece_count * SHA1_DIGEST_LEN;
        if piece_digests.len() != expected {
            return Err(TorrentError::DigestLength {
                expected,
                actual: piece_digests.len(),
            });
        }

        Ok(Self {
            piece_length,
            piece_digests,
            files,
        })
    }

    /// Convenience constructor for a single-file torrent.
    pub fn single_file(
        name: impl Into<PathBuf>,
        length: u64,
        piece_length: u32,
        piece_digests: impl Into<Bytes>,
    ) -> Result<Self, TorrentError> {
        Self::new(
            piece_length,
            piece_digests,
            vec![TorrentFile::new(name, length)],
        )
    }

    /// Piece length in bytes.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Files in torrent order.
    pub fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    /// Total length of the virtual byte stream.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// Number of pieces.
    pub fn piece_count(&self) -> u32 {
        (self.piece_digests.len() / SHA1_DIGEST_LEN) as u32
    }

    /// Expected digest for piece `index`.
    ///
    /// Returns `None` past the end of the torrent.
    pub fn piece_digest(&self, index: u32) -> Option<PieceDigest> {
        let start = index as usize * SHA1_DIGEST_LEN;
        self.piece_digests
            .get(start..start + SHA1_DIGEST_LEN)
            .and_then(PieceDigest::from_slice)
    }

    /// Offset of piece `index` in the virtual stream.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Actual size of piece `index`, accounting for the short final piece.
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = self.piece_offset(index);
        let end = (start + self.piece_length as u64).min(self.total_length());
        end.saturating_sub(start)
    }

    /// Exclusive end offset of piece `index`, clamped to the stream end.
    pub fn piece_end(&self, index: u32) -> u64 {
        (self.piece_offset(index) + self.piece_length as u64).min(self.total_length())
    }
}
