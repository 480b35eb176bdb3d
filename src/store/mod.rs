//! Durable keyed storage
//!
//! A single SQLite database owns notes, edges, documents, chunks, the
//! tag index, snapshots, and the append-only event log. Embeddings live
//! out-of-row in a sidecar table co-located for efficient vector scans.
//! Derived indexes (tags, degree) are maintained in the same transaction
//! as the underlying write.

mod resolve;
mod sqlite;
#[cfg(feature = "embeddings")]
mod sqlite_vec;

pub use resolve::{parse_edge_ref, resolve_edge_ref, resolve_note_ref};
pub use sqlite::{DocumentWrite, SnapshotFilter, SqliteStore};

use thiserror::Error;

/// Errors internal to the storage layer. Converted to `ForestError`
/// kinds at the core boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("edge not found: {0}")]
    EdgeNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("ambiguous reference: {input}")]
    Ambiguous {
        input: String,
        candidates: Vec<String>,
    },

    #[error("embedding dimension mismatch: stored {stored}, configured {configured}")]
    DimensionMismatch { stored: usize, configured: usize },

    #[error("date parsing error: {0}")]
    DateParse(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
