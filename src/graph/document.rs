//! Document and chunk rows for the document pipeline

use super::note::NoteId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chunks are joined with this separator to reconstruct the canonical
/// body. Fixed; offsets are computed against it.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Unique identifier for a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a segment within a document. Assigned at first
/// split and preserved across edits so editors can address segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a markdown body is split into chunk notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "strategy")]
pub enum ChunkStrategy {
    /// Split at top-level headings.
    Headers,
    /// Fixed-size windows over paragraph boundaries, with overlap
    /// carried into the following chunk.
    SizeOverlap { size: usize, overlap: usize },
    /// Headers first; oversized sections fall back to size windows.
    Hybrid { size: usize, overlap: usize },
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        ChunkStrategy::Headers
    }
}

/// Import-time options recorded in document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub chunk_strategy: ChunkStrategy,
    /// Whether `link_one` runs for each chunk (and the root) on import.
    pub auto_link: bool,
    /// Whether a root summary note was created.
    pub has_root: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            chunk_strategy: ChunkStrategy::default(),
            auto_link: true,
            has_root: true,
            source_file: None,
            template_id: None,
        }
    }
}

/// A canonical markdown source split into ordered chunk notes.
///
/// `body` is the canonical body: the chunk bodies joined in
/// `chunk_order` with [`CHUNK_SEPARATOR`]. `version` increases on every
/// committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub body: String,
    pub metadata: DocumentMetadata,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_note_id: Option<NoteId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            title: title.into(),
            body: body.into(),
            metadata: DocumentMetadata::default(),
            version: 1,
            root_note_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One chunk's position in its document.
///
/// `offset`/`length` locate the chunk body inside the canonical body.
/// `chunk_order` is dense and unique within the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub document_id: DocumentId,
    pub segment_id: SegmentId,
    pub note_id: NoteId,
    pub offset: usize,
    pub length: usize,
    pub chunk_order: u32,
    /// blake3 hex digest of the chunk body; used to detect changed
    /// segments on multi-segment edits.
    pub checksum: String,
}

/// Content checksum shared by the pipeline and the backfill scan.
pub fn chunk_checksum(body: &str) -> String {
    blake3::hash(body.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        assert_eq!(chunk_checksum("abc"), chunk_checksum("abc"));
        assert_ne!(chunk_checksum("abc"), chunk_checksum("abd"));
    }

    #[test]
    fn chunk_strategy_serializes_tagged() {
        let json = serde_json::to_string(&ChunkStrategy::SizeOverlap {
            size: 1200,
            overlap: 120,
        })
        .unwrap();
        assert!(json.contains("size-overlap"));
        let back: ChunkStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back,
            ChunkStrategy::SizeOverlap {
                size: 1200,
                overlap: 120
            }
        );
    }
}
