//! Error kinds exposed at the core boundary
//!
//! Per-unit transactions guarantee that any error short of `Internal`
//! leaves the store consistent. `EmbeddingUnavailable` is informational
//! for single-note operations and never aborts them.

use thiserror::Error;

/// Errors produced by Forest core operations.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A short id or title resolved to more than one entity.
    /// Carries the candidate ids so frontends can list them.
    #[error("ambiguous reference '{input}': {} candidates", candidates.len())]
    AmbiguousReference {
        input: String,
        candidates: Vec<String>,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    /// The embedding provider failed after all retries. The enclosing
    /// operation proceeded with embedding-less scoring.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Fatal configuration error: stored embeddings do not match the
    /// configured dimension. Requires an admin rebuild.
    #[error("embedding dimension mismatch: stored {stored}, configured {configured}")]
    DimensionMismatch { stored: usize, configured: usize },

    /// A document pipeline operation detected a broken invariant.
    /// The message names the specific invariant.
    #[error("document integrity violation: {0}")]
    DocumentIntegrityViolation(String),

    #[error("provider rate limited: {0}")]
    ProviderRateLimited(String),

    /// A long operation was cancelled; partial progress is in the
    /// operation's report.
    #[error("cancelled after {completed} units")]
    Cancelled { completed: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for Forest core operations.
pub type ForestResult<T> = Result<T, ForestError>;

impl From<crate::store::StorageError> for ForestError {
    fn from(e: crate::store::StorageError) -> Self {
        use crate::store::StorageError;
        match e {
            StorageError::NoteNotFound(id) => ForestError::NotFound(format!("note {id}")),
            StorageError::EdgeNotFound(id) => ForestError::NotFound(format!("edge {id}")),
            StorageError::DocumentNotFound(id) => ForestError::NotFound(format!("document {id}")),
            StorageError::SnapshotNotFound(id) => ForestError::NotFound(format!("snapshot {id}")),
            StorageError::DimensionMismatch { stored, configured } => {
                ForestError::DimensionMismatch { stored, configured }
            }
            StorageError::Ambiguous { input, candidates } => {
                ForestError::AmbiguousReference { input, candidates }
            }
            other => ForestError::Internal(other.to_string()),
        }
    }
}
