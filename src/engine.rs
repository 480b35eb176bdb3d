//! ForestEngine: the programmatic surface over the core
//!
//! Composition root: owns the store, the provider adapter, the linking
//! engine, the document pipeline, search, context, temporal, and admin
//! subsystems. Every mutating operation appends its events inside the
//! store transaction and broadcasts them here after commit, then gives
//! the auto-snapshot policy a chance to fire.

use crate::admin::{Admin, BatchReport, CancellationToken, RetagOptions, TagSource};
use crate::config::{EmbedProviderKind, ForestConfig};
use crate::context::{ContextBuilder, ContextParams, ContextSummary};
use crate::document::{
    DocumentPipeline, EditOutcome, ImportOptions, ImportOutcome, SegmentEdit,
};
use crate::embed::{build_provider, EmbeddingProvider};
use crate::error::{ForestError, ForestResult};
use crate::events::{DomainEvent, EventBus, EventFilter, EventKind, FilteredReceiver};
use crate::graph::{
    Document, DocumentId, Edge, EdgeType, Note, NoteId, NoteMetadata, SegmentId, Snapshot,
    SnapshotType,
};
use crate::ingest::normalize;
use crate::link::{LinkingEngine, Suggestion};
use crate::search::{
    MetadataFilter, Neighborhood, Search, SemanticSearchParams, SemanticSearchResult,
};
use crate::store::{resolve_edge_ref, resolve_note_ref, SnapshotFilter, SqliteStore};
use crate::temporal::{DiffReport, GrowthPoint, Temporal};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::info;

/// Input for note capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureInput {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub metadata: NoteMetadata,
}

/// Partial update for a note. Unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct ForestEngine {
    config: ForestConfig,
    store: Arc<SqliteStore>,
    provider: Arc<dyn EmbeddingProvider>,
    linker: Arc<LinkingEngine>,
    pipeline: DocumentPipeline,
    search: Arc<Search>,
    context: ContextBuilder,
    temporal: Temporal,
    admin: Admin,
    bus: EventBus,
    /// Most recent listing shown to the caller; `@ordinal` references
    /// resolve against it.
    listing: Mutex<Vec<NoteId>>,
}

impl ForestEngine {
    /// Open the store at the configured path and wire up every
    /// subsystem. Fails fast on dimension mismatches; repairs legacy
    /// chunk notes missing their document rows.
    pub fn open(config: ForestConfig) -> ForestResult<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.db_path, &config)?);
        let engine = Self::with_store(config, store)?;
        engine.pipeline.backfill()?;
        Ok(engine)
    }

    /// In-memory engine, used by tests and ephemeral sessions.
    pub fn open_in_memory(config: ForestConfig) -> ForestResult<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open_in_memory(&config)?);
        Self::with_store(config, store)
    }

    /// In-memory engine with an injected provider. Lets tests register
    /// fixed vectors on a mock before wiring.
    pub fn open_in_memory_with_provider(
        config: ForestConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> ForestResult<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open_in_memory(&config)?);
        Self::assemble(config, store, provider)
    }

    fn with_store(config: ForestConfig, store: Arc<SqliteStore>) -> ForestResult<Self> {
        let provider = build_provider(&config)?;
        Self::assemble(config, store, provider)
    }

    fn assemble(
        config: ForestConfig,
        store: Arc<SqliteStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> ForestResult<Self> {
        if config.embed_provider != EmbedProviderKind::None
            && provider.dimension() != config.embed_dimension
        {
            return Err(ForestError::DimensionMismatch {
                stored: config.embed_dimension,
                configured: provider.dimension(),
            });
        }
        let bus = EventBus::new();
        let linker = Arc::new(LinkingEngine::new(store.clone(), &config));
        let pipeline = DocumentPipeline::new(store.clone(), provider.clone(), linker.clone());
        let search = Arc::new(Search::new(store.clone(), provider.clone()));
        let context = ContextBuilder::new(store.clone(), search.clone(), &config.bridge_tag_pattern);
        let temporal = Temporal::new(store.clone(), config.auto_snapshot.clone());
        let admin = Admin::new(store.clone(), provider.clone(), linker.clone(), bus.clone());
        Ok(Self {
            config,
            store,
            provider,
            linker,
            pipeline,
            search,
            context,
            temporal,
            admin,
            bus,
            listing: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    // === Events ===

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        self.bus.subscribe_filtered(filter)
    }

    fn publish_all(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    fn after_mutation(&self) -> ForestResult<()> {
        if let Some((_, events)) = self.temporal.maybe_auto_snapshot()? {
            self.publish_all(events);
        }
        Ok(())
    }

    // === Notes ===

    /// Capture a new note: normalize, embed, persist, link.
    pub async fn capture(&self, input: CaptureInput) -> ForestResult<Note> {
        if input.title.trim().is_empty() && input.body.trim().is_empty() {
            return Err(ForestError::ValidationFailed(
                "a note needs a title or a body".to_string(),
            ));
        }
        for tag in &input.tags {
            if tag.chars().any(char::is_whitespace) {
                return Err(ForestError::ValidationFailed(format!(
                    "tag '{tag}' contains whitespace"
                )));
            }
        }

        let normalized = normalize(&input.title, &input.body, &input.tags);
        let mut note = Note::new(input.title, input.body).with_metadata(input.metadata);
        note.tags = normalized.tags;
        note.token_counts = normalized.token_counts;
        if let Some(vector) = self.provider.embed(&normalized.canonical_text).await? {
            note.embedding = Some(vector);
            note.embedding_model = Some(self.provider.model_id());
        }

        let event = DomainEvent::new(EventKind::NodeCreated, vec![note.id.clone()], note.tags.clone())
            .with_payload(json!({ "title": note.title, "is_chunk": note.metadata.is_chunk }));
        self.store.put_note(&note, std::slice::from_ref(&event))?;
        self.bus.publish(event);

        let report = self.linker.link_incremental(&note.id)?;
        self.publish_all(report.events);
        self.after_mutation()?;
        info!(note = %note.id, "note captured");
        Ok(note)
    }

    /// Resolve a reference and load the note.
    pub fn get_note(&self, reference: &str) -> ForestResult<Note> {
        let id = self.resolve(reference)?;
        self.store
            .get_note(&id)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id}")))
    }

    /// Apply a partial update: rederive tags and tokens, re-embed when
    /// the text changed, relink, and re-enter the document pipeline for
    /// chunk notes.
    pub async fn update_note(&self, reference: &str, patch: NotePatch) -> ForestResult<Note> {
        let id = self.resolve(reference)?;
        let mut note = self
            .store
            .get_note(&id)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id}")))?;

        let title_changed = patch.title.as_ref().is_some_and(|t| t != &note.title);
        let body_changed = patch.body.as_ref().is_some_and(|b| b != &note.body);
        if let Some(title) = patch.title {
            note.title = title;
        }
        if let Some(body) = patch.body {
            note.body = body;
        }
        let explicit_tags = patch.tags.clone().unwrap_or_default();
        let normalized = normalize(&note.title, &note.body, &explicit_tags);
        let tags_changed = normalized.tags != note.tags;
        note.tags = normalized.tags;
        note.token_counts = normalized.token_counts;

        if title_changed || body_changed || note.embedding.is_none() {
            match self.provider.embed(&normalized.canonical_text).await? {
                Some(vector) => {
                    note.embedding = Some(vector);
                    note.embedding_model = Some(self.provider.model_id());
                }
                None => note.clear_embedding(),
            }
        }
        note.updated_at = Utc::now();

        let event = DomainEvent::new(EventKind::NodeUpdated, vec![note.id.clone()], note.tags.clone())
            .with_payload(json!({
                "title": title_changed,
                "body": body_changed,
                "tags": tags_changed,
            }));
        self.store.put_note(&note, std::slice::from_ref(&event))?;
        self.bus.publish(event);

        // A changed chunk body invalidates the document's offsets and
        // checksum; tag-only edits leave the canonical body alone.
        if note.metadata.is_chunk && (body_changed || title_changed) {
            if let Some(outcome) = self.pipeline.reindex_chunk_note(&note.id)? {
                self.publish_all(outcome.events);
            }
        }

        let report = self.linker.link_incremental(&note.id)?;
        self.publish_all(report.events);
        self.after_mutation()?;
        Ok(note)
    }

    /// Delete a note, cascading its edges. Chunk notes and document
    /// roots are refused here; the document pipeline owns them.
    pub fn delete_note(&self, reference: &str) -> ForestResult<()> {
        let id = self.resolve(reference)?;
        let note = self
            .store
            .get_note(&id)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id}")))?;
        if note.metadata.is_chunk {
            return Err(ForestError::ValidationFailed(
                "chunk notes are deleted through the document pipeline".to_string(),
            ));
        }
        if let Some(document) = self.store.document_with_root(&id)? {
            return Err(ForestError::ValidationFailed(format!(
                "note is the root of document {}; delete the document instead",
                document.id
            )));
        }

        let mut events = Vec::new();
        // node.deleted first, edge cascades after it in the log.
        events.push(
            DomainEvent::new(EventKind::NodeDeleted, vec![id.clone()], note.tags.clone())
                .with_payload(json!({ "title": note.title, "is_chunk": false })),
        );
        for edge in self.store.edges_for(&id)? {
            events.push(
                DomainEvent::new(
                    EventKind::EdgeDeleted,
                    vec![edge.source_id.clone(), edge.target_id.clone()],
                    note.tags.clone(),
                )
                .with_payload(json!({
                    "source_id": edge.source_id.as_str(),
                    "target_id": edge.target_id.as_str(),
                    "before_score": edge.score,
                    "edge_type": edge.edge_type.to_string(),
                })),
            );
        }
        if !self.store.delete_note(&id, &events)? {
            return Err(ForestError::ConflictingState(format!(
                "note {id} was deleted concurrently"
            )));
        }
        self.publish_all(events);
        self.after_mutation()?;
        Ok(())
    }

    // === Edges ===

    /// Create a manual edge between two notes. Manual edges are exempt
    /// from the threshold policy.
    pub fn link_manual(&self, a: &str, b: &str) -> ForestResult<Edge> {
        let id_a = self.resolve(a)?;
        let id_b = self.resolve(b)?;
        if id_a == id_b {
            return Err(ForestError::ValidationFailed(
                "cannot link a note to itself".to_string(),
            ));
        }
        let note_a = self
            .store
            .get_note(&id_a)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id_a}")))?;
        let note_b = self
            .store
            .get_note(&id_b)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id_b}")))?;

        let breakdown = self.linker.scorer().score(&note_a, &note_b);
        let edge = Edge::new(id_a, id_b, EdgeType::Manual).with_scores(
            breakdown.semantic_score,
            breakdown.tag_score,
            1.0, // manual edges rank first regardless of signals
            breakdown.components,
        );
        let event = DomainEvent::new(
            EventKind::EdgeCreated,
            vec![edge.source_id.clone(), edge.target_id.clone()],
            note_a.tags.iter().chain(note_b.tags.iter()).cloned().collect(),
        )
        .with_payload(json!({
            "source_id": edge.source_id.as_str(),
            "target_id": edge.target_id.as_str(),
            "edge_type": "manual",
            "before_score": null,
            "after_score": edge.score,
        }));
        self.store.upsert_edge(&edge, std::slice::from_ref(&event))?;
        self.bus.publish(event);
        self.after_mutation()?;
        Ok(edge)
    }

    /// Remove an edge by reference. Structural edges are pipeline-owned
    /// and refused.
    pub fn unlink(&self, reference: &str) -> ForestResult<()> {
        let listing = self.listing.lock().unwrap().clone();
        let edge = resolve_edge_ref(&self.store, &listing, reference)?;
        if edge.edge_type.is_structural() {
            return Err(ForestError::ValidationFailed(
                "structural edges are managed by the document pipeline".to_string(),
            ));
        }
        let event = DomainEvent::new(
            EventKind::EdgeDeleted,
            vec![edge.source_id.clone(), edge.target_id.clone()],
            Vec::new(),
        )
        .with_payload(json!({
            "source_id": edge.source_id.as_str(),
            "target_id": edge.target_id.as_str(),
            "before_score": edge.score,
            "edge_type": edge.edge_type.to_string(),
        }));
        self.store
            .delete_edge_between(&edge.source_id, &edge.target_id, std::slice::from_ref(&event))?;
        self.bus.publish(event);
        self.after_mutation()?;
        Ok(())
    }

    pub fn edges_for(&self, reference: &str) -> ForestResult<Vec<Edge>> {
        let id = self.resolve(reference)?;
        Ok(self.store.edges_for(&id)?)
    }

    pub fn suggestions(&self, reference: &str, limit: usize) -> ForestResult<Vec<Suggestion>> {
        let id = self.resolve(reference)?;
        self.linker.suggestions(&id, limit)
    }

    // === Search ===

    pub async fn semantic_search(
        &self,
        query: &str,
        params: &SemanticSearchParams,
    ) -> ForestResult<SemanticSearchResult> {
        let result = self.search.semantic(query, params).await?;
        *self.listing.lock().unwrap() =
            result.hits.iter().map(|h| h.note_id.clone()).collect();
        Ok(result)
    }

    pub fn metadata_search(&self, filter: &MetadataFilter) -> ForestResult<Vec<Note>> {
        let notes = self.search.metadata(filter)?;
        *self.listing.lock().unwrap() = notes.iter().map(|n| n.id.clone()).collect();
        Ok(notes)
    }

    pub fn neighborhood(
        &self,
        reference: &str,
        depth: usize,
        limit: usize,
    ) -> ForestResult<Neighborhood> {
        let id = self.resolve(reference)?;
        self.search.neighborhood(&id, depth, limit)
    }

    pub async fn context(&self, params: &ContextParams) -> ForestResult<ContextSummary> {
        self.context.context(params).await
    }

    // === Documents ===

    pub async fn import_document(
        &self,
        title: &str,
        body: &str,
        options: ImportOptions,
    ) -> ForestResult<ImportOutcome> {
        let outcome = self.pipeline.import(title, body, options).await?;
        self.publish_all(outcome.events.clone());
        self.after_mutation()?;
        Ok(outcome)
    }

    pub async fn edit_segments(
        &self,
        document_id: &DocumentId,
        edits: &[SegmentEdit],
    ) -> ForestResult<EditOutcome> {
        let outcome = self.pipeline.edit_segments(document_id, edits).await?;
        self.publish_all(outcome.events.clone());
        self.after_mutation()?;
        Ok(outcome)
    }

    pub fn reorder_document(
        &self,
        document_id: &DocumentId,
        order: &[SegmentId],
    ) -> ForestResult<EditOutcome> {
        let outcome = self.pipeline.reorder(document_id, order)?;
        self.publish_all(outcome.events.clone());
        self.after_mutation()?;
        Ok(outcome)
    }

    pub fn delete_chunk(
        &self,
        document_id: &DocumentId,
        segment_id: &SegmentId,
    ) -> ForestResult<EditOutcome> {
        let outcome = self.pipeline.delete_chunk(document_id, segment_id)?;
        self.publish_all(outcome.events.clone());
        self.after_mutation()?;
        Ok(outcome)
    }

    pub fn get_document(&self, id: &DocumentId) -> ForestResult<Document> {
        self.store
            .get_document(id)?
            .ok_or_else(|| ForestError::NotFound(format!("document {id}")))
    }

    pub fn document_chunks(&self, id: &DocumentId) -> ForestResult<Vec<crate::graph::DocumentChunk>> {
        Ok(self.store.chunks_for(id)?)
    }

    /// Startup backfill for legacy chunk notes. Idempotent.
    pub fn backfill_canonical_documents(&self) -> ForestResult<usize> {
        self.pipeline.backfill()
    }

    // === Temporal ===

    pub fn create_snapshot(&self, snapshot_type: SnapshotType) -> ForestResult<Snapshot> {
        let (snapshot, events) = self.temporal.create_snapshot(snapshot_type)?;
        self.publish_all(events);
        Ok(snapshot)
    }

    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> ForestResult<Vec<Snapshot>> {
        self.temporal.list_snapshots(filter)
    }

    pub fn diff(&self, since: DateTime<Utc>, section_limit: usize) -> ForestResult<DiffReport> {
        self.temporal.diff(since, section_limit)
    }

    pub fn growth(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ForestResult<Vec<GrowthPoint>> {
        self.temporal.growth(since, until, limit)
    }

    // === Admin ===

    pub async fn recompute_embeddings(
        &self,
        rescore: bool,
        cancel: &CancellationToken,
    ) -> ForestResult<BatchReport> {
        self.admin.recompute_embeddings(rescore, cancel).await
    }

    pub async fn retag_all(
        &self,
        tagger: &dyn TagSource,
        options: &RetagOptions,
        cancel: &CancellationToken,
    ) -> ForestResult<BatchReport> {
        self.admin.retag_all(tagger, options, cancel).await
    }

    pub fn rescore_all(&self, cancel: &CancellationToken) -> ForestResult<BatchReport> {
        self.admin.rescore_all(cancel)
    }

    // === Misc ===

    pub fn all_tags(&self) -> ForestResult<Vec<(String, u64)>> {
        Ok(self.store.all_tags()?)
    }

    pub fn degree(&self, reference: &str) -> ForestResult<u64> {
        let id = self.resolve(reference)?;
        Ok(self.store.degree(&id)?)
    }

    fn resolve(&self, reference: &str) -> ForestResult<NoteId> {
        let listing = self.listing.lock().unwrap().clone();
        Ok(resolve_note_ref(&self.store, &listing, reference)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedProviderKind;

    fn engine() -> ForestEngine {
        let config = ForestConfig {
            embed_provider: EmbedProviderKind::Mock,
            embed_dimension: 32,
            ..Default::default()
        };
        ForestEngine::open_in_memory(config).unwrap()
    }

    #[tokio::test]
    async fn capture_persists_and_indexes() {
        let engine = engine();
        let note = engine
            .capture(CaptureInput {
                title: "Salmon".to_string(),
                body: "A note about #ecology".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let loaded = engine.get_note(note.id.as_str()).unwrap();
        assert_eq!(loaded.tags, vec!["ecology"]);
        assert!(loaded.embedding.is_some());
    }

    #[tokio::test]
    async fn capture_rejects_empty_note() {
        let engine = engine();
        let err = engine.capture(CaptureInput::default()).await.unwrap_err();
        assert!(matches!(err, ForestError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn capture_rejects_whitespace_tag() {
        let engine = engine();
        let err = engine
            .capture(CaptureInput {
                title: "t".to_string(),
                tags: vec!["bad tag".to_string()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForestError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn update_rederives_tags() {
        let engine = engine();
        let note = engine
            .capture(CaptureInput {
                title: "t".to_string(),
                body: "#old".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let updated = engine
            .update_note(
                note.id.as_str(),
                NotePatch {
                    body: Some("#new body".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.tags, vec!["new"]);
    }

    #[tokio::test]
    async fn delete_emits_node_then_edge_events() {
        let engine = engine();
        let a = engine
            .capture(CaptureInput {
                title: "A".to_string(),
                body: "x".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = engine
            .capture(CaptureInput {
                title: "B".to_string(),
                body: "y".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        engine.link_manual(a.id.as_str(), b.id.as_str()).unwrap();

        let mut rx = engine.subscribe();
        engine.delete_note(a.id.as_str()).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::NodeDeleted);
        assert_eq!(second.kind, EventKind::EdgeDeleted);
    }

    #[tokio::test]
    async fn manual_link_and_unlink_round_trip() {
        let engine = engine();
        let a = engine
            .capture(CaptureInput {
                title: "First note".to_string(),
                body: "alpha".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = engine
            .capture(CaptureInput {
                title: "Second note".to_string(),
                body: "beta".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let edge = engine.link_manual(a.id.as_str(), b.id.as_str()).unwrap();
        assert_eq!(edge.edge_type, EdgeType::Manual);
        assert_eq!(engine.degree(a.id.as_str()).unwrap(), 1);

        let reference = format!("{}::{}", a.id.as_str(), b.id.as_str());
        engine.unlink(&reference).unwrap();
        assert_eq!(engine.degree(a.id.as_str()).unwrap(), 0);
    }

    #[tokio::test]
    async fn ordinal_resolution_follows_listing() {
        let engine = engine();
        engine
            .capture(CaptureInput {
                title: "Listed note".to_string(),
                body: "body".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let notes = engine.metadata_search(&MetadataFilter::default()).unwrap();
        assert_eq!(notes.len(), 1);
        let via_ordinal = engine.get_note("@0").unwrap();
        assert_eq!(via_ordinal.id, notes[0].id);
    }

    #[tokio::test]
    async fn deleting_a_chunk_note_directly_is_refused() {
        let engine = engine();
        let outcome = engine
            .import_document(
                "Guide",
                "# One\n\nfirst\n\n# Two\n\nsecond",
                crate::document::ImportOptions::default(),
            )
            .await
            .unwrap();
        let chunk = &outcome.chunk_note_ids[0];
        let err = engine.delete_note(chunk.as_str()).unwrap_err();
        assert!(matches!(err, ForestError::ValidationFailed(_)));

        // The root is equally protected.
        let root = outcome.root_note_id.unwrap();
        let err = engine.delete_note(root.as_str()).unwrap_err();
        assert!(matches!(err, ForestError::ValidationFailed(_)));
    }
}
