//! Vellum: an embedded, segment-based inverted-index storage engine.
//!
//! Documents are buffered in memory and sealed into immutable segments: a
//! prefix-compressed term dictionary with a sampled in-memory index,
//! delta-encoded postings with multi-level skip lists, and a live-document
//! bitset that narrows under deletion without rewriting postings. A single
//! [`IndexWriter`] per directory flushes, deletes and merges; readers are
//! point-in-time snapshots untouched by later commits.

pub mod config;
pub mod directory;
pub mod error;
pub mod index;
pub mod manifest;
pub mod scheduler;
pub mod segment;

pub use config::StorageConfig;
pub use directory::{Directory, FsDirectory, RamDirectory};
pub use error::{Result, VellumError};
pub use index::{IndexReader, IndexWriter};
pub use manifest::SegmentManifest;
pub use scheduler::{LogMergeFailures, MergeFailureHandler, MergeScheduler};
pub use segment::{DocId, SegmentId, SegmentMeta, SegmentReader, Term, TermInfo};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
