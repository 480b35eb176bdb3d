//! Forest: Knowledge Base Graph Engine
//!
//! Ingests markdown notes, computes vector embeddings and lexical
//! signals, and maintains a weighted, undirected graph of semantic
//! relations between notes.
//!
//! # Core Concepts
//!
//! - **Notes**: titled markdown documents with tags and an optional
//!   unit-norm embedding — the graph's vertices
//! - **Edges**: undirected weighted links carrying dual (semantic, tag)
//!   scores and a components breakdown
//! - **Documents**: canonical markdown sources split into ordered chunk
//!   notes held together by structural edges
//!
//! # Example
//!
//! ```no_run
//! use forest::{CaptureInput, ForestConfig, ForestEngine};
//!
//! # async fn demo() -> forest::ForestResult<()> {
//! let engine = ForestEngine::open(ForestConfig::default())?;
//! engine
//!     .capture(CaptureInput {
//!         title: "Anadromous fish migration".into(),
//!         body: "Salmon return upriver to spawn #ecology #rivers".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod config;
pub mod context;
pub mod document;
pub mod embed;
mod engine;
mod error;
pub mod events;
pub mod graph;
pub mod ingest;
pub mod link;
pub mod scoring;
pub mod search;
pub mod store;
pub mod temporal;

pub use admin::{Admin, BatchReport, CancellationToken, NormalizerTagSource, RetagOptions, TagSource};
pub use config::{
    AutoSnapshotConfig, EmbedProviderKind, ForestConfig, RateLimitConfig, RetryConfig,
    ScoreWeights,
};
pub use context::{ContextParams, ContextSummary, TopologyNote};
pub use document::{ImportOptions, ImportOutcome, SegmentEdit};
pub use embed::{EmbeddingProvider, MockProvider, NoneProvider, OpenAiProvider};
pub use engine::{CaptureInput, ForestEngine, NotePatch};
pub use error::{ForestError, ForestResult};
pub use events::{DomainEvent, EventBus, EventFilter, EventKind};
pub use graph::{
    ChunkStrategy, CreatedBy, Document, DocumentChunk, DocumentId, Edge, EdgeId, EdgeType, Note,
    NoteId, NoteMetadata, Origin, ScoreComponents, SegmentId, Snapshot, SnapshotId, SnapshotType,
};
pub use link::{LinkReport, LinkingEngine, Suggestion};
pub use scoring::{ScoreBreakdown, Scorer};
pub use search::{
    MetadataFilter, Neighborhood, Search, SearchHit, SemanticSearchParams, SemanticSearchResult,
    SortOrder,
};
pub use store::{SnapshotFilter, SqliteStore, StorageError, StorageResult};
pub use temporal::{Counts, DiffReport, GrowthPoint, Temporal};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
