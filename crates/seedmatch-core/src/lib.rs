//! Seedmatch Core - Types and piece geometry for matching torrents to local files.
//!
//! This crate provides:
//! - Digest types (`PieceDigest`, `FileHash`)
//! - The decoded torrent descriptor consumed by the matcher
//! - Slot derivation: the byte range each torrent file occupies in the
//!   torrent's virtual stream, and which pieces are interior to it versus
//!   shared with its neighbors

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod digest;
pub mod slots;
pub mod torrent;

pub use digest::{sha1_digest, FileHash, PieceDigest, SHA1_DIGEST_LEN};
pub use slots::{boundary_spans, build_slots, BoundarySpan, Slot};
pub use torrent::{TorrentDescriptor, TorrentError, TorrentFile};
