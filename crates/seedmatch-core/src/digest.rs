//! Digest types used throughout seedmatch:
//! - `PieceDigest` - SHA-1 of one torrent piece (20 bytes)
//! - `FileHash` - opaque whole-file hash from the file catalog

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Length of a SHA-1 digest in bytes.
pub const SHA1_DIGEST_LEN: usize = 20;

/// SHA-1 digest of a single torrent piece.
///
/// The torrent metainfo carries one of these per piece, concatenated into
/// the `pieces` blob. Equality against a recomputed digest is the only
/// correctness check the matcher performs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PieceDigest(pub [u8; SHA1_DIGEST_LEN]);

impl PieceDigest {
    /// Creates a digest from a 20-byte array.
    pub const fn new(bytes: [u8; SHA1_DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; SHA1_DIGEST_LEN] {
        &self.0
    }

    /// Creates a digest from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != SHA1_DIGEST_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; SHA1_DIGEST_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns the digest as a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a digest from an arbitrary byte slice.
    ///
    /// Returns `None` unless the slice is exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SHA1_DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for PieceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceDigest({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for PieceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl From<[u8; SHA1_DIGEST_LEN]> for PieceDigest {
    fn from(bytes: [u8; SHA1_DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PieceDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Computes the SHA-1 digest of a byte slice.
pub fn sha1_digest(data: &[u8]) -> PieceDigest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    PieceDigest(hasher.finalize().into())
}

/// Whole-file content hash as recorded in the file catalog.
///
/// The indexing side chooses the algorithm; the matcher only ever uses the
/// value as an opaque cache key, so it is kept as the catalog's string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileHash(String);

impl FileHash {
    /// Wraps a catalog hash value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hash bytes used for key encoding.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileHash {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for FileHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}
