//! Integration tests and fixtures for the seedmatch matcher.
//!
//! This crate provides:
//! - A fixture that lays out local files, indexes them into a real catalog,
//!   and hands back a matcher wired to read-only views
//! - Torrent construction helpers that hash fixture bytes into descriptors

pub mod harness;

pub use harness::{init_tracing, seeded_bytes, torrent, Fixture};
