//! Range hashing over local files.
//!
//! All verification I/O funnels through [`PieceHasher`], which owns the
//! global read semaphore: at most `max_concurrent_reads` ranges are in
//! flight at once, no matter how many candidates are being verified. SHA-1
//! is cheap next to the reads, so each digest is computed on the task that
//! read its bytes.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;

use seedmatch_core::{sha1_digest, PieceDigest};

/// Read granularity while feeding a range through the hasher.
const READ_CHUNK: usize = 256 * 1024;

/// Errors from hashing a byte range.
#[derive(Debug, Error)]
pub enum HashError {
    /// The file could not be opened or read.
    #[error("{path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file ended before the requested range did.
    #[error("{path} ended before {wanted} bytes at offset {offset}")]
    Truncated {
        /// File being read.
        path: PathBuf,
        /// Start of the requested range.
        offset: u64,
        /// Requested range length.
        wanted: u64,
    },
}

impl HashError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// One byte range of a local file, as fed to [`PieceHasher::hash_stitched`].
#[derive(Debug, Clone)]
pub struct FileSegment {
    /// File to read.
    pub path: PathBuf,
    /// Offset of the first byte.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

/// Computes SHA-1 digests of file ranges under a global concurrency cap.
pub struct PieceHasher {
    permits: Semaphore,
    ranges_read: AtomicU64,
}

impl PieceHasher {
    /// Creates a hasher allowing up to `max_concurrent_reads` in-flight
    /// range reads.
    pub fn new(max_concurrent_reads: usize) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent_reads.max(1)),
            ranges_read: AtomicU64::new(0),
        }
    }

    /// SHA-1 of `length` bytes of `path` starting at `offset`.
    ///
    /// A zero-length range is valid (it digests the empty string) and
    /// performs no I/O.
    pub async fn hash_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<PieceDigest, HashError> {
        if length == 0 {
            return Ok(sha1_digest(&[]));
        }

        let _permit = self.permit().await;
        self.ranges_read.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha1::new();
        feed_range(&mut hasher, path, offset, length).await?;
        Ok(PieceDigest(hasher.finalize().into()))
    }

    /// SHA-1 of several file ranges concatenated in order, without
    /// buffering the concatenation.
    pub async fn hash_stitched(&self, segments: &[FileSegment]) -> Result<PieceDigest, HashError> {
        let _permit = self.permit().await;

        let mut hasher = Sha1::new();
        for segment in segments {
            if segment.length == 0 {
                continue;
            }
            self.ranges_read.fetch_add(1, Ordering::Relaxed);
            feed_range(&mut hasher, &segment.path, segment.offset, segment.length).await?;
        }
        Ok(PieceDigest(hasher.finalize().into()))
    }

    /// Reads a range verbatim, under the same concurrency cap.
    ///
    /// Used where the bytes feed several digest computations (joining a
    /// straddling piece across candidate combinations) and must only be
    /// read once.
    pub async fn read_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, HashError> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let _permit = self.permit().await;
        self.ranges_read.fetch_add(1, Ordering::Relaxed);

        let mut file = File::open(path).await.map_err(|e| HashError::io(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| HashError::io(path, e))?;

        let mut buf = vec![0u8; length as usize];
        match file.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(HashError::Truncated {
                path: path.to_owned(),
                offset,
                wanted: length,
            }),
            Err(e) => Err(HashError::io(path, e)),
        }
    }

    /// Number of range reads issued so far.
    ///
    /// Zero-length ranges are not counted; they never touch the disk.
    pub fn ranges_read(&self) -> u64 {
        self.ranges_read.load(Ordering::Relaxed)
    }

    async fn permit(&self) -> tokio::sync::SemaphorePermit<'_> {
        // The semaphore lives as long as the hasher and is never closed.
        self.permits
            .acquire()
            .await
            .expect("hasher semaphore closed")
    }
}

async fn feed_range(
    hasher: &mut Sha1,
    path: &Path,
    offset: u64,
    length: u64,
) -> Result<(), HashError> {
    let mut file = File::open(path).await.map_err(|e| HashError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| HashError::io(path, e))?;

    let mut buf = vec![0u8; READ_CHUNK.min(length as usize)];
    let mut remaining = length;
    while remaining > 0 {
        let want = READ_CHUNK.min(remaining as usize);
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| HashError::io(path, e))?;
        if n == 0 {
            return Err(HashError::Truncated {
                path: path.to_owned(),
                offset,
                wanted: length,
            });
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(bytes)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn hashes_a_middle_range() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", b"0123456789");

        let hasher = PieceHasher::new(4);
        let digest = hasher.hash_range(&path, 2, 5).await.unwrap();
        assert_eq!(digest, sha1_digest(b"23456"));
        assert_eq!(hasher.ranges_read(), 1);
    }

    #[tokio::test]
    async fn zero_length_range_digests_empty_string() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", b"abc");

        let hasher = PieceHasher::new(4);
        let digest = hasher.hash_range(&path, 3, 0).await.unwrap();
        assert_eq!(digest, sha1_digest(&[]));
        assert_eq!(hasher.ranges_read(), 0);
    }

    #[tokio::test]
    async fn short_file_reports_truncation() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", b"abc");

        let hasher = PieceHasher::new(4);
        let err = hasher.hash_range(&path, 0, 10).await.unwrap_err();
        assert!(matches!(err, HashError::Truncated { wanted: 10, .. }));

        // Seeking wholly past the end behaves the same.
        let err = hasher.hash_range(&path, 100, 1).await.unwrap_err();
        assert!(matches!(err, HashError::Truncated { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");

        let hasher = PieceHasher::new(4);
        let err = hasher.hash_range(&path, 0, 1).await.unwrap_err();
        assert!(matches!(err, HashError::Io { .. }));
    }

    #[tokio::test]
    async fn stitched_ranges_hash_as_concatenation() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"hello ");
        let b = write_file(&dir, "b", b"xxworldxx");

        let hasher = PieceHasher::new(4);
        let digest = hasher
            .hash_stitched(&[
                FileSegment {
                    path: a,
                    offset: 0,
                    length: 6,
                },
                FileSegment {
                    path: b,
                    offset: 2,
                    length: 5,
                },
            ])
            .await
            .unwrap();
        assert_eq!(digest, sha1_digest(b"hello world"));
    }

    #[tokio::test]
    async fn stitched_skips_empty_segments() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"data");

        let hasher = PieceHasher::new(4);
        let digest = hasher
            .hash_stitched(&[
                FileSegment {
                    path: a.clone(),
                    offset: 0,
                    length: 0,
                },
                FileSegment {
                    path: a,
                    offset: 0,
                    length: 4,
                },
            ])
            .await
            .unwrap();
        assert_eq!(digest, sha1_digest(b"data"));
        assert_eq!(hasher.ranges_read(), 1);
    }

    #[tokio::test]
    async fn read_range_returns_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", b"0123456789");

        let hasher = PieceHasher::new(4);
        let bytes = hasher.read_range(&path, 4, 3).await.unwrap();
        assert_eq!(bytes, b"456");

        let empty = hasher.read_range(&path, 4, 0).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn concurrent_hashing_respects_the_cap() {
        // Run many ranges through a single-permit hasher; all must finish.
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", &vec![7u8; 8192]);

        let hasher = std::sync::Arc::new(PieceHasher::new(1));
        let mut join = tokio::task::JoinSet::new();
        for i in 0..32u64 {
            let hasher = hasher.clone();
            let path = path.clone();
            join.spawn(async move { hasher.hash_range(&path, i * 16, 16).await });
        }
        let mut done = 0;
        while let Some(res) = join.join_next().await {
            res.unwrap().unwrap();
            done += 1;
        }
        assert_eq!(done, 32);
        assert_eq!(hasher.ranges_read(), 32);
    }
}
