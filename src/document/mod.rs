//! Document pipeline
//!
//! Turns a markdown body into an ordered list of chunk notes plus an
//! optional root summary note, and keeps the canonical document and its
//! chunk notes in sync through every supported edit path. Invariants
//! checked after every mutation: dense `chunk_order`, offsets that
//! reconstruct the canonical body, parent pointers, and structural
//! edges matching the chunk list. A multi-segment save commits all
//! segment changes or none.

mod split;

pub use split::{split, Segment};

use crate::embed::EmbeddingProvider;
use crate::error::{ForestError, ForestResult};
use crate::events::{DomainEvent, EventKind};
use crate::graph::{
    chunk_checksum, ChunkStrategy, Document, DocumentChunk, DocumentId, DocumentMetadata, Edge,
    EdgeType, Note, NoteId, NoteMetadata, Origin, SegmentId, CHUNK_SEPARATOR,
};
use crate::ingest::normalize;
use crate::link::LinkingEngine;
use crate::store::{DocumentWrite, SqliteStore};
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Options accepted by [`DocumentPipeline::import`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chunk_strategy: ChunkStrategy,
    pub auto_link: bool,
    /// Create a root summary note linked to every chunk.
    pub create_root: bool,
    pub source_file: Option<String>,
    pub template_id: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_strategy: ChunkStrategy::default(),
            auto_link: true,
            create_root: true,
            source_file: None,
            template_id: None,
        }
    }
}

/// Result of an import.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub document_id: DocumentId,
    pub root_note_id: Option<NoteId>,
    pub chunk_note_ids: Vec<NoteId>,
    /// Events committed with the import, for post-commit broadcast.
    pub events: Vec<DomainEvent>,
}

/// One segment change in a multi-segment save.
#[derive(Debug, Clone)]
pub struct SegmentEdit {
    pub segment_id: SegmentId,
    pub new_content: String,
}

/// Result of a document mutation.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub document_id: DocumentId,
    pub version: u64,
    pub changed_note_ids: Vec<NoteId>,
    pub events: Vec<DomainEvent>,
}

pub struct DocumentPipeline {
    store: Arc<SqliteStore>,
    provider: Arc<dyn EmbeddingProvider>,
    linker: Arc<LinkingEngine>,
}

impl DocumentPipeline {
    pub fn new(
        store: Arc<SqliteStore>,
        provider: Arc<dyn EmbeddingProvider>,
        linker: Arc<LinkingEngine>,
    ) -> Self {
        Self {
            store,
            provider,
            linker,
        }
    }

    /// Import a markdown body as a document: split, create chunk notes
    /// (and optionally a root note), persist rows with offsets and
    /// checksums, build structural edges, then auto-link.
    pub async fn import(
        &self,
        title: &str,
        body: &str,
        options: ImportOptions,
    ) -> ForestResult<ImportOutcome> {
        if title.trim().is_empty() {
            return Err(ForestError::ValidationFailed(
                "document title must not be empty".to_string(),
            ));
        }
        let segments = split(body, &options.chunk_strategy);
        if segments.is_empty() {
            return Err(ForestError::ValidationFailed(
                "document body produced no chunks".to_string(),
            ));
        }

        let mut document = Document::new(title, String::new());
        document.metadata = DocumentMetadata {
            chunk_strategy: options.chunk_strategy.clone(),
            auto_link: options.auto_link,
            has_root: options.create_root,
            source_file: options.source_file.clone(),
            template_id: options.template_id.clone(),
        };

        // Chunk notes, titled "{DocTitle} [k/N] {SectionHeading}".
        let total = segments.len();
        let mut chunk_notes: Vec<Note> = Vec::with_capacity(total);
        for (k, segment) in segments.iter().enumerate() {
            let chunk_title = chunk_title(title, k, total, segment.heading.as_deref());
            let normalized = normalize(&chunk_title, &segment.text, &[]);
            let mut note = Note::new(chunk_title, segment.text.clone());
            note.tags = normalized.tags;
            note.token_counts = normalized.token_counts;
            note.metadata = NoteMetadata {
                origin: Origin::Import,
                parent_document_id: Some(document.id.clone()),
                chunk_order: Some(k as u32),
                is_chunk: true,
                ..Default::default()
            };
            chunk_notes.push(note);
        }

        let mut root_note = if options.create_root {
            let normalized = normalize(title, body, &[]);
            let mut note = Note::new(title, body);
            note.tags = normalized.tags;
            note.token_counts = normalized.token_counts;
            note.metadata = NoteMetadata {
                origin: Origin::Import,
                parent_document_id: Some(document.id.clone()),
                is_chunk: false,
                ..Default::default()
            };
            Some(note)
        } else {
            None
        };

        // Batch-embed chunks and root in one provider call.
        let mut texts: Vec<String> = chunk_notes
            .iter()
            .map(|n| crate::ingest::canonical_text(&n.title, &n.body))
            .collect();
        if let Some(root) = &root_note {
            texts.push(crate::ingest::canonical_text(&root.title, &root.body));
        }
        let mut vectors = self.provider.embed_batch(&texts).await?;
        if let Some(root) = root_note.as_mut() {
            if let Some(Some(vector)) = vectors.pop() {
                root.embedding = Some(vector);
                root.embedding_model = Some(self.provider.model_id());
            }
        }
        for (note, vector) in chunk_notes.iter_mut().zip(vectors) {
            if let Some(vector) = vector {
                note.embedding = Some(vector);
                note.embedding_model = Some(self.provider.model_id());
            }
        }

        document.root_note_id = root_note.as_ref().map(|n| n.id.clone());
        document.body = join_bodies(chunk_notes.iter().map(|n| n.body.as_str()));

        let chunks = build_chunk_rows(&document.id, &chunk_notes, None);
        verify_rows(&document, &chunks, &chunk_notes)?;

        // Structural edges: root ↔ chunk, chunk[k] ↔ chunk[k+1].
        let mut edges: Vec<Edge> = Vec::new();
        if let Some(root) = &root_note {
            for note in &chunk_notes {
                edges.push(Edge::structural(
                    root.id.clone(),
                    note.id.clone(),
                    EdgeType::StructuralParent,
                ));
            }
        }
        for pair in chunk_notes.windows(2) {
            edges.push(Edge::structural(
                pair[0].id.clone(),
                pair[1].id.clone(),
                EdgeType::StructuralSequential,
            ));
        }

        let mut events: Vec<DomainEvent> = Vec::new();
        let mut put_notes = chunk_notes.clone();
        if let Some(root) = root_note.clone() {
            put_notes.push(root);
        }
        for note in &put_notes {
            events.push(
                DomainEvent::new(EventKind::NodeCreated, vec![note.id.clone()], note.tags.clone())
                    .with_payload(json!({ "title": note.title, "is_chunk": note.metadata.is_chunk })),
            );
        }
        events.push(
            DomainEvent::new(EventKind::DocumentImported, all_ids(&put_notes), Vec::new())
                .with_payload(json!({
                    "document_id": document.id.as_str(),
                    "chunk_count": chunk_notes.len(),
                    "version": document.version,
                })),
        );

        self.store.apply_document_write(DocumentWrite {
            document: &document,
            chunks: &chunks,
            put_notes: &put_notes,
            delete_note_ids: &[],
            put_edges: &edges,
            delete_edge_pairs: &[],
            events: &events,
        })?;

        let chunk_note_ids: Vec<NoteId> = chunk_notes.iter().map(|n| n.id.clone()).collect();
        let mut all_events = events;
        if options.auto_link {
            for id in chunk_note_ids
                .iter()
                .chain(document.root_note_id.iter())
            {
                let report = self.linker.link_incremental(id)?;
                all_events.extend(report.events);
            }
        }

        info!(document = %document.id, chunks = chunk_note_ids.len(), "document imported");
        Ok(ImportOutcome {
            document_id: document.id,
            root_note_id: root_note.map(|n| n.id),
            chunk_note_ids,
            events: all_events,
        })
    }

    /// Multi-segment save: update changed segments (by checksum),
    /// reflow offsets, bump `version` once, re-embed and rescore only
    /// the changed chunks. Commits all changes or none.
    pub async fn edit_segments(
        &self,
        document_id: &DocumentId,
        edits: &[SegmentEdit],
    ) -> ForestResult<EditOutcome> {
        let mut document = self.get_document(document_id)?;
        let chunks = self.store.chunks_for(document_id)?;
        let mut notes = self.load_chunk_notes(&chunks)?;

        let by_segment: BTreeMap<&str, usize> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.segment_id.as_str(), i))
            .collect();

        let mut changed: BTreeSet<usize> = BTreeSet::new();
        for edit in edits {
            let Some(&index) = by_segment.get(edit.segment_id.as_str()) else {
                return Err(ForestError::NotFound(format!(
                    "segment {} in document {document_id}",
                    edit.segment_id
                )));
            };
            if chunk_checksum(&edit.new_content) != chunks[index].checksum {
                notes[index].body = edit.new_content.clone();
                changed.insert(index);
            }
        }

        if changed.is_empty() {
            return Ok(EditOutcome {
                document_id: document_id.clone(),
                version: document.version,
                changed_note_ids: Vec::new(),
                events: Vec::new(),
            });
        }

        // Rederive tags/tokens and re-embed the changed chunks only.
        let texts: Vec<String> = changed
            .iter()
            .map(|&i| crate::ingest::canonical_text(&notes[i].title, &notes[i].body))
            .collect();
        let vectors = self.provider.embed_batch(&texts).await?;
        for (&index, vector) in changed.iter().zip(vectors) {
            let note = &mut notes[index];
            let normalized = normalize(&note.title, &note.body, &[]);
            note.tags = normalized.tags;
            note.token_counts = normalized.token_counts;
            match vector {
                Some(v) => {
                    note.embedding = Some(v);
                    note.embedding_model = Some(self.provider.model_id());
                }
                None => note.clear_embedding(),
            }
            note.updated_at = Utc::now();
        }

        document.body = join_bodies(notes.iter().map(|n| n.body.as_str()));
        document.version += 1;
        document.updated_at = Utc::now();
        let new_chunks = build_chunk_rows(&document.id, &notes, Some(&chunks));
        verify_rows(&document, &new_chunks, &notes)?;

        let changed_notes: Vec<Note> = changed.iter().map(|&i| notes[i].clone()).collect();
        let mut events: Vec<DomainEvent> = changed_notes
            .iter()
            .map(|note| {
                DomainEvent::new(EventKind::NodeUpdated, vec![note.id.clone()], note.tags.clone())
                    .with_payload(json!({ "body": true, "tags": true, "title": false }))
            })
            .collect();
        events.push(
            DomainEvent::new(EventKind::DocumentUpdated, all_ids(&changed_notes), Vec::new())
                .with_payload(json!({
                    "document_id": document.id.as_str(),
                    "version": document.version,
                    "changed_segments": changed.len(),
                })),
        );

        self.store.apply_document_write(DocumentWrite {
            document: &document,
            chunks: &new_chunks,
            put_notes: &changed_notes,
            delete_note_ids: &[],
            put_edges: &[],
            delete_edge_pairs: &[],
            events: &events,
        })?;

        let changed_note_ids: Vec<NoteId> = changed_notes.iter().map(|n| n.id.clone()).collect();
        let mut all_events = events;
        for id in &changed_note_ids {
            let report = self.linker.link_incremental(id)?;
            all_events.extend(report.events);
        }

        debug!(document = %document.id, version = document.version, "segments edited");
        Ok(EditOutcome {
            document_id: document_id.clone(),
            version: document.version,
            changed_note_ids,
            events: all_events,
        })
    }

    /// Re-entered after a direct `update_note` on a chunk: rebuild
    /// offsets and checksums from the current note bodies and bump
    /// `version`. Sequential edges stay valid because `chunk_order` did
    /// not change.
    pub fn reindex_chunk_note(&self, note_id: &NoteId) -> ForestResult<Option<EditOutcome>> {
        let Some(chunk) = self.store.chunk_for_note(note_id)? else {
            return Ok(None);
        };
        let mut document = self.get_document(&chunk.document_id)?;
        let chunks = self.store.chunks_for(&chunk.document_id)?;
        let notes = self.load_chunk_notes(&chunks)?;

        document.body = join_bodies(notes.iter().map(|n| n.body.as_str()));
        document.version += 1;
        document.updated_at = Utc::now();
        let new_chunks = build_chunk_rows(&document.id, &notes, Some(&chunks));
        verify_rows(&document, &new_chunks, &notes)?;

        let events = vec![DomainEvent::new(
            EventKind::DocumentUpdated,
            vec![note_id.clone()],
            Vec::new(),
        )
        .with_payload(json!({
            "document_id": document.id.as_str(),
            "version": document.version,
            "changed_segments": 1,
        }))];

        self.store.apply_document_write(DocumentWrite {
            document: &document,
            chunks: &new_chunks,
            put_notes: &[],
            delete_note_ids: &[],
            put_edges: &[],
            delete_edge_pairs: &[],
            events: &events,
        })?;

        Ok(Some(EditOutcome {
            document_id: document.id,
            version: document.version,
            changed_note_ids: vec![note_id.clone()],
            events,
        }))
    }

    /// Reorder chunks. Bodies are untouched; rows reflow, sequential
    /// edges are rebuilt, `version` bumps.
    pub fn reorder(
        &self,
        document_id: &DocumentId,
        order: &[SegmentId],
    ) -> ForestResult<EditOutcome> {
        let mut document = self.get_document(document_id)?;
        let chunks = self.store.chunks_for(document_id)?;
        if order.len() != chunks.len()
            || !chunks
                .iter()
                .all(|c| order.iter().any(|s| s == &c.segment_id))
        {
            return Err(ForestError::ValidationFailed(
                "reorder must list every segment exactly once".to_string(),
            ));
        }

        let by_segment: BTreeMap<&str, &DocumentChunk> =
            chunks.iter().map(|c| (c.segment_id.as_str(), c)).collect();
        let old_note_order: Vec<NoteId> = chunks.iter().map(|c| c.note_id.clone()).collect();
        let new_chunk_refs: Vec<&DocumentChunk> = order
            .iter()
            .map(|s| by_segment[s.as_str()])
            .collect();

        let mut notes = Vec::with_capacity(new_chunk_refs.len());
        for chunk in &new_chunk_refs {
            notes.push(self.load_note(&chunk.note_id)?);
        }
        for (k, note) in notes.iter_mut().enumerate() {
            note.metadata.chunk_order = Some(k as u32);
        }

        document.body = join_bodies(notes.iter().map(|n| n.body.as_str()));
        document.version += 1;
        document.updated_at = Utc::now();
        let new_chunks = build_chunk_rows(&document.id, &notes, Some(&chunks));
        verify_rows(&document, &new_chunks, &notes)?;

        // Rebuild sequential edges for the new adjacency.
        let new_note_order: Vec<NoteId> = notes.iter().map(|n| n.id.clone()).collect();
        let old_pairs = adjacent_pairs(&old_note_order);
        let new_pairs = adjacent_pairs(&new_note_order);
        let delete_edge_pairs: Vec<(NoteId, NoteId)> = old_pairs
            .difference(&new_pairs)
            .cloned()
            .collect();
        let put_edges: Vec<Edge> = new_pairs
            .difference(&old_pairs)
            .map(|(a, b)| Edge::structural(a.clone(), b.clone(), EdgeType::StructuralSequential))
            .collect();

        let events = vec![DomainEvent::new(
            EventKind::DocumentUpdated,
            new_note_order.clone(),
            Vec::new(),
        )
        .with_payload(json!({
            "document_id": document.id.as_str(),
            "version": document.version,
            "reordered": true,
        }))];

        self.store.apply_document_write(DocumentWrite {
            document: &document,
            chunks: &new_chunks,
            put_notes: &notes,
            delete_note_ids: &[],
            put_edges: &put_edges,
            delete_edge_pairs: &delete_edge_pairs,
            events: &events,
        })?;

        Ok(EditOutcome {
            document_id: document_id.clone(),
            version: document.version,
            changed_note_ids: new_note_order,
            events,
        })
    }

    /// Delete one chunk: remove the note and its row, compact
    /// `chunk_order`, rebuild sequential edges, bump `version`. The
    /// last chunk takes the document (and root note) with it.
    pub fn delete_chunk(
        &self,
        document_id: &DocumentId,
        segment_id: &SegmentId,
    ) -> ForestResult<EditOutcome> {
        let mut document = self.get_document(document_id)?;
        let chunks = self.store.chunks_for(document_id)?;
        let Some(target) = chunks.iter().find(|c| &c.segment_id == segment_id) else {
            return Err(ForestError::NotFound(format!(
                "segment {segment_id} in document {document_id}"
            )));
        };
        let target_note = self.load_note(&target.note_id)?;

        let mut events: Vec<DomainEvent> = Vec::new();
        for edge in self.store.edges_for(&target.note_id)? {
            events.push(
                DomainEvent::new(
                    EventKind::EdgeDeleted,
                    vec![edge.source_id.clone(), edge.target_id.clone()],
                    Vec::new(),
                )
                .with_payload(json!({
                    "source_id": edge.source_id.as_str(),
                    "target_id": edge.target_id.as_str(),
                    "before_score": edge.score,
                    "edge_type": edge.edge_type.to_string(),
                })),
            );
        }
        events.push(
            DomainEvent::new(
                EventKind::NodeDeleted,
                vec![target.note_id.clone()],
                target_note.tags.clone(),
            )
            .with_payload(json!({ "title": target_note.title, "is_chunk": true })),
        );

        // Last chunk: the document record and root note go too.
        if chunks.len() == 1 {
            let mut doomed = vec![target.note_id.clone()];
            if let Some(root_id) = &document.root_note_id {
                for edge in self.store.edges_for(root_id)? {
                    if !edge.touches(&target.note_id) {
                        events.push(
                            DomainEvent::new(
                                EventKind::EdgeDeleted,
                                vec![edge.source_id.clone(), edge.target_id.clone()],
                                Vec::new(),
                            )
                            .with_payload(json!({
                                "source_id": edge.source_id.as_str(),
                                "target_id": edge.target_id.as_str(),
                                "before_score": edge.score,
                                "edge_type": edge.edge_type.to_string(),
                            })),
                        );
                    }
                }
                let root = self.load_note(root_id)?;
                events.push(
                    DomainEvent::new(EventKind::NodeDeleted, vec![root_id.clone()], root.tags)
                        .with_payload(json!({ "title": root.title, "is_chunk": false })),
                );
                doomed.push(root_id.clone());
            }
            events.push(
                DomainEvent::new(EventKind::DocumentUpdated, doomed.clone(), Vec::new())
                    .with_payload(json!({
                        "document_id": document.id.as_str(),
                        "deleted": true,
                    })),
            );
            self.store.delete_document(document_id, &doomed, &events)?;
            return Ok(EditOutcome {
                document_id: document_id.clone(),
                version: document.version,
                changed_note_ids: doomed,
                events,
            });
        }

        let remaining: Vec<&DocumentChunk> = chunks
            .iter()
            .filter(|c| &c.segment_id != segment_id)
            .collect();
        let mut notes = Vec::with_capacity(remaining.len());
        for chunk in &remaining {
            notes.push(self.load_note(&chunk.note_id)?);
        }
        for (k, note) in notes.iter_mut().enumerate() {
            note.metadata.chunk_order = Some(k as u32);
        }

        document.body = join_bodies(notes.iter().map(|n| n.body.as_str()));
        document.version += 1;
        document.updated_at = Utc::now();
        let new_chunks = build_chunk_rows(&document.id, &notes, Some(&chunks));
        verify_rows(&document, &new_chunks, &notes)?;

        // Stitch the gap left by the removed chunk. Its own sequential
        // edges cascade with the note delete.
        let old_order: Vec<NoteId> = chunks.iter().map(|c| c.note_id.clone()).collect();
        let new_order: Vec<NoteId> = notes.iter().map(|n| n.id.clone()).collect();
        let old_pairs = adjacent_pairs(&old_order);
        let new_pairs = adjacent_pairs(&new_order);
        let put_edges: Vec<Edge> = new_pairs
            .difference(&old_pairs)
            .map(|(a, b)| Edge::structural(a.clone(), b.clone(), EdgeType::StructuralSequential))
            .collect();

        events.push(
            DomainEvent::new(EventKind::DocumentUpdated, new_order.clone(), Vec::new())
                .with_payload(json!({
                    "document_id": document.id.as_str(),
                    "version": document.version,
                    "removed_segment": segment_id.as_str(),
                })),
        );

        self.store.apply_document_write(DocumentWrite {
            document: &document,
            chunks: &new_chunks,
            put_notes: &notes,
            delete_note_ids: &[target.note_id.clone()],
            put_edges: &put_edges,
            delete_edge_pairs: &[],
            events: &events,
        })?;

        Ok(EditOutcome {
            document_id: document_id.clone(),
            version: document.version,
            changed_note_ids: new_order,
            events,
        })
    }

    /// Startup backfill: chunk notes lacking `DocumentChunk` rows
    /// (legacy data) get canonical document rows synthesized.
    /// Idempotent — a second run finds nothing to do.
    pub fn backfill(&self) -> ForestResult<usize> {
        let orphans = self.store.orphan_chunk_note_ids()?;
        let mut by_document: BTreeMap<String, Vec<Note>> = BTreeMap::new();
        for id in orphans {
            let note = self.load_note(&id)?;
            let Some(parent) = note.metadata.parent_document_id.clone() else {
                continue; // flagged as chunk but unparented; nothing to synthesize
            };
            by_document.entry(parent.to_string()).or_default().push(note);
        }

        let mut repaired = 0;
        for (document_id, mut notes) in by_document {
            let document_id = DocumentId::from_string(document_id);
            notes.sort_by_key(|n| (n.metadata.chunk_order.unwrap_or(u32::MAX), n.id.clone()));
            for (k, note) in notes.iter_mut().enumerate() {
                note.metadata.chunk_order = Some(k as u32);
            }

            let mut document = match self.store.get_document(&document_id)? {
                Some(mut existing) => {
                    existing.version += 1;
                    existing
                }
                None => {
                    let title = notes[0]
                        .title
                        .split(" [")
                        .next()
                        .unwrap_or(&notes[0].title)
                        .to_string();
                    let mut d = Document::new(title, String::new());
                    d.id = document_id.clone();
                    d
                }
            };
            document.body = join_bodies(notes.iter().map(|n| n.body.as_str()));
            document.updated_at = Utc::now();

            let chunks = build_chunk_rows(&document.id, &notes, None);
            verify_rows(&document, &chunks, &notes)?;
            let events = vec![DomainEvent::new(
                EventKind::DocumentUpdated,
                notes.iter().map(|n| n.id.clone()).collect(),
                Vec::new(),
            )
            .with_payload(json!({
                "document_id": document.id.as_str(),
                "version": document.version,
                "backfilled": true,
            }))];
            self.store.apply_document_write(DocumentWrite {
                document: &document,
                chunks: &chunks,
                put_notes: &notes,
                delete_note_ids: &[],
                put_edges: &[],
                delete_edge_pairs: &[],
                events: &events,
            })?;
            repaired += 1;
        }
        if repaired > 0 {
            info!(documents = repaired, "backfilled canonical documents");
        }
        Ok(repaired)
    }

    fn get_document(&self, id: &DocumentId) -> ForestResult<Document> {
        self.store
            .get_document(id)?
            .ok_or_else(|| ForestError::NotFound(format!("document {id}")))
    }

    fn load_note(&self, id: &NoteId) -> ForestResult<Note> {
        self.store
            .get_note(id)?
            .ok_or_else(|| ForestError::NotFound(format!("note {id}")))
    }

    fn load_chunk_notes(&self, chunks: &[DocumentChunk]) -> ForestResult<Vec<Note>> {
        chunks.iter().map(|c| self.load_note(&c.note_id)).collect()
    }
}

/// `"{DocTitle} [k/N] {SectionHeading}"`, 1-based.
fn chunk_title(doc_title: &str, k: usize, total: usize, heading: Option<&str>) -> String {
    match heading {
        Some(h) if !h.is_empty() => format!("{} [{}/{}] {}", doc_title, k + 1, total, h),
        _ => format!("{} [{}/{}]", doc_title, k + 1, total),
    }
}

fn join_bodies<'a>(bodies: impl Iterator<Item = &'a str>) -> String {
    bodies.collect::<Vec<_>>().join(CHUNK_SEPARATOR)
}

fn all_ids(notes: &[Note]) -> Vec<NoteId> {
    notes.iter().map(|n| n.id.clone()).collect()
}

fn adjacent_pairs(order: &[NoteId]) -> BTreeSet<(NoteId, NoteId)> {
    order
        .windows(2)
        .map(|w| crate::graph::canonical_pair(w[0].clone(), w[1].clone()))
        .collect()
}

/// Build chunk rows from ordered notes, preserving segment ids from the
/// previous row set where the note survives.
fn build_chunk_rows(
    document_id: &DocumentId,
    notes: &[Note],
    previous: Option<&[DocumentChunk]>,
) -> Vec<DocumentChunk> {
    let segment_for: BTreeMap<&str, &SegmentId> = previous
        .map(|chunks| {
            chunks
                .iter()
                .map(|c| (c.note_id.as_str(), &c.segment_id))
                .collect()
        })
        .unwrap_or_default();

    let mut rows = Vec::with_capacity(notes.len());
    let mut offset = 0usize;
    for (k, note) in notes.iter().enumerate() {
        let segment_id = segment_for
            .get(note.id.as_str())
            .map(|s| (*s).clone())
            .unwrap_or_default();
        rows.push(DocumentChunk {
            document_id: document_id.clone(),
            segment_id,
            note_id: note.id.clone(),
            offset,
            length: note.body.len(),
            chunk_order: k as u32,
            checksum: chunk_checksum(&note.body),
        });
        offset += note.body.len() + CHUNK_SEPARATOR.len();
    }
    rows
}

/// Invariant check run before every commit. Errors name the broken
/// invariant.
fn verify_rows(
    document: &Document,
    chunks: &[DocumentChunk],
    notes: &[Note],
) -> ForestResult<()> {
    for (k, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_order != k as u32 {
            return Err(ForestError::DocumentIntegrityViolation(format!(
                "chunk_order not dense: position {k} holds order {}",
                chunk.chunk_order
            )));
        }
    }
    let reconstructed = join_bodies(notes.iter().map(|n| n.body.as_str()));
    if reconstructed != document.body {
        return Err(ForestError::DocumentIntegrityViolation(
            "canonical body does not match chunk concatenation".to_string(),
        ));
    }
    for (chunk, note) in chunks.iter().zip(notes) {
        let located = document
            .body
            .get(chunk.offset..chunk.offset + chunk.length);
        if located != Some(note.body.as_str()) {
            return Err(ForestError::DocumentIntegrityViolation(format!(
                "offset {}..+{} does not locate chunk {}",
                chunk.offset, chunk.length, chunk.chunk_order
            )));
        }
        if note.metadata.parent_document_id.as_ref() != Some(&document.id) {
            return Err(ForestError::DocumentIntegrityViolation(format!(
                "chunk note {} does not point at document {}",
                note.id, document.id
            )));
        }
        if !note.metadata.is_chunk {
            return Err(ForestError::DocumentIntegrityViolation(format!(
                "note {} in chunk list is not flagged is_chunk",
                note.id
            )));
        }
    }
    Ok(())
}
