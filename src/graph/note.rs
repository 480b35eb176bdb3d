//! Note representation — the graph's vertex

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::document::DocumentId;

/// Unique identifier for a note
///
/// Serializes as a plain string. Stable across renames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Create a new random NoteId (UUID-based)
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

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a note entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Capture,
    Write,
    Synthesize,
    Import,
    Api,
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "capture" => Ok(Origin::Capture),
            "write" => Ok(Origin::Write),
            "synthesize" => Ok(Origin::Synthesize),
            "import" => Ok(Origin::Import),
            "api" => Ok(Origin::Api),
            _ => Err(format!("unknown origin: {}", s)),
        }
    }
}

/// Who authored a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    User,
    Ai,
    /// A named agent, e.g. "synthesizer".
    Agent(String),
}

/// Provenance metadata attached to every note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub origin: Origin,
    pub created_by: CreatedBy,
    /// Model identifier for AI-authored notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Notes this one was synthesized from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_note_ids: Vec<NoteId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_document_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_order: Option<u32>,
    #[serde(default)]
    pub is_chunk: bool,
}

impl Default for NoteMetadata {
    fn default() -> Self {
        Self {
            origin: Origin::Capture,
            created_by: CreatedBy::User,
            model: None,
            source_note_ids: Vec::new(),
            parent_document_id: None,
            chunk_order: None,
            is_chunk: false,
        }
    }
}

/// A note in the knowledge graph.
///
/// `tags` and `token_counts` are always the deterministic output of
/// normalization over the current title+body (merged with explicit
/// tags); they are rederived on every write. `embedding` and
/// `embedding_model` are both present or both absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    /// Markdown body. Display text preserved as written; lowercasing is
    /// an indexing concern only.
    pub body: String,
    /// Lowercased, deduplicated, deterministically ordered.
    pub tags: Vec<String>,
    /// Bag of words from title+body after stopword/punctuation filtering.
    pub token_counts: BTreeMap<String, u32>,
    /// Unit-norm float32 vector of the store's configured dimension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Provider+model identifier that produced `embedding`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub metadata: NoteMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Create a new note shell. Tags and token counts are filled in by
    /// the ingestion pipeline before the note is persisted.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            token_counts: BTreeMap::new(),
            embedding: None,
            embedding_model: None,
            metadata: NoteMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: NoteMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach an embedding together with the model that produced it.
    pub fn with_embedding(mut self, vector: Vec<f32>, model: impl Into<String>) -> Self {
        self.embedding = Some(vector);
        self.embedding_model = Some(model.into());
        self
    }

    /// Clear the embedding and its model identifier together.
    pub fn clear_embedding(&mut self) {
        self.embedding = None;
        self.embedding_model = None;
    }

    pub fn is_chunk(&self) -> bool {
        self.metadata.is_chunk
    }
}
