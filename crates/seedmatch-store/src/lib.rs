//! Seedmatch Store - Persistence for the torrent matcher.
//!
//! Provides:
//! - A read-only view of the file catalog written by the indexing side
//!   (path, whole-file hash, size), queryable by size
//! - The piece-hash store: a durable cache of per-file piece digests that
//!   lets repeated matches skip re-hashing

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod catalog;
pub mod config;
pub mod pieces;

pub use catalog::{CandidateSource, CatalogEntry, FileCatalog, MemoryCatalog};
pub use config::StoreConfig;
pub use pieces::{PieceHashStore, PieceStoreStats};

use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RocksDB error
    #[error("database error: {0}")]
    Database(String),

    /// The file catalog could not be opened or read. Fatal for a match.
    #[error("file catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A stored row failed to decode.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}
