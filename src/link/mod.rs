//! Linking engine
//!
//! Recomputes a note's edges against the rest of the graph and applies
//! the two-threshold policy:
//!
//! - `score >= accept_threshold` — the edge is persisted (`semantic`,
//!   or `bridge-tag` when the pair shares a bridge tag);
//! - `suggest_threshold <= score < accept_threshold` — not persisted;
//!   surfaced only by the query-time [`LinkingEngine::suggestions`]
//!   ranking;
//! - `score < suggest_threshold` — any existing auto edge is removed.
//!
//! Structural and manual edges are exempt: rescoring refreshes their
//! components metadata and never removes them. Each pass commits in a
//! single per-note transaction, so a failed pass leaves the store
//! consistent and a rerun is safe.

use crate::config::ForestConfig;
use crate::error::ForestResult;
use crate::events::{DomainEvent, EventKind};
use crate::graph::{Edge, EdgeType, Note, NoteId};
use crate::scoring::{ScoreBreakdown, Scorer};
use crate::store::SqliteStore;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Score changes below this are treated as noise: no write, no event.
const SCORE_EPSILON: f32 = 1e-6;

/// Outcome of one linking pass over a note.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    /// Edges left untouched (unchanged score, or exempt types).
    pub kept: usize,
    pub candidates_scored: usize,
    /// Events committed with the pass, for post-commit broadcast.
    pub events: Vec<DomainEvent>,
}

/// A pair in the suggestion band, never persisted.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub note_id: NoteId,
    pub title: String,
    pub breakdown: ScoreBreakdown,
}

pub struct LinkingEngine {
    store: Arc<SqliteStore>,
    scorer: Scorer,
    accept_threshold: f32,
    suggest_threshold: f32,
    candidate_k: usize,
}

impl LinkingEngine {
    pub fn new(store: Arc<SqliteStore>, config: &ForestConfig) -> Self {
        Self {
            store,
            scorer: Scorer::new(config.score_weights, &config.bridge_tag_pattern),
            accept_threshold: config.accept_threshold,
            suggest_threshold: config.suggest_threshold,
            candidate_k: config.candidate_k,
        }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Compute edges for `note_id` against every other note. Idempotent:
    /// a second run with no intervening mutation changes nothing and
    /// emits no events.
    pub fn link_one(&self, note_id: &NoteId) -> ForestResult<LinkReport> {
        let note = self.load(note_id)?;
        let candidates: Vec<NoteId> = self
            .store
            .all_note_ids()?
            .into_iter()
            .filter(|id| id != note_id)
            .collect();
        self.apply(&note, &candidates)
    }

    /// Faster path after an edit: score only the incremental candidate
    /// set (current neighbors, top-K nearest in embedding space, notes
    /// sharing any tag). K bounds worst-case cost per edit.
    pub fn link_incremental(&self, note_id: &NoteId) -> ForestResult<LinkReport> {
        let note = self.load(note_id)?;
        let mut candidates: BTreeSet<NoteId> = BTreeSet::new();

        for edge in self.store.edges_for(note_id)? {
            if let Some(other) = edge.other_endpoint(note_id) {
                candidates.insert(other.clone());
            }
        }
        if let Some(query) = &note.embedding {
            for (id, _) in self.store.nearest_embeddings(query, self.candidate_k)? {
                candidates.insert(id);
            }
        }
        for id in self.store.notes_with_any_tag(&note.tags)? {
            candidates.insert(id);
        }
        candidates.remove(note_id);

        let candidates: Vec<NoteId> = candidates.into_iter().collect();
        self.apply(&note, &candidates)
    }

    /// Limited to the note's current edges; used by the admin rescore.
    pub fn rescore_one(&self, note_id: &NoteId) -> ForestResult<LinkReport> {
        let note = self.load(note_id)?;
        let candidates: Vec<NoteId> = self
            .store
            .edges_for(note_id)?
            .iter()
            .filter_map(|e| e.other_endpoint(note_id).cloned())
            .collect();
        self.apply(&note, &candidates)
    }

    /// Rank unpersisted pairs in the suggestion band. Pure query; the
    /// graph is not mutated.
    pub fn suggestions(&self, note_id: &NoteId, limit: usize) -> ForestResult<Vec<Suggestion>> {
        let note = self.load(note_id)?;
        let mut out = Vec::new();
        for other in self.store.all_notes()? {
            if other.id == note.id {
                continue;
            }
            if let Some(edge) = self.store.edge_between(&note.id, &other.id)? {
                if !edge.edge_type.is_auto() {
                    continue;
                }
            }
            let breakdown = self.scorer.score(&note, &other);
            if breakdown.score >= self.suggest_threshold && breakdown.score < self.accept_threshold
            {
                out.push(Suggestion {
                    note_id: other.id.clone(),
                    title: other.title.clone(),
                    breakdown,
                });
            }
        }
        // Ties break by id for determinism.
        out.sort_by(|a, b| {
            b.breakdown
                .score
                .partial_cmp(&a.breakdown.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.note_id.cmp(&b.note_id))
        });
        out.truncate(limit);
        Ok(out)
    }

    fn load(&self, note_id: &NoteId) -> ForestResult<Note> {
        self.store
            .get_note(note_id)?
            .ok_or_else(|| crate::error::ForestError::NotFound(format!("note {note_id}")))
    }

    /// Score the note against each candidate and commit the resulting
    /// edge set in one transaction.
    fn apply(&self, note: &Note, candidates: &[NoteId]) -> ForestResult<LinkReport> {
        let mut report = LinkReport::default();
        let mut upserts: Vec<Edge> = Vec::new();
        let mut removals: Vec<(NoteId, NoteId)> = Vec::new();
        let mut events: Vec<DomainEvent> = Vec::new();

        for candidate_id in candidates {
            let Some(candidate) = self.store.get_note(candidate_id)? else {
                continue; // deleted concurrently
            };
            report.candidates_scored += 1;
            let existing = self.store.edge_between(&note.id, candidate_id)?;

            // Exempt types: refresh components only.
            if let Some(edge) = &existing {
                if !edge.edge_type.is_auto() {
                    let breakdown = self.scorer.score(note, &candidate);
                    if edge.components != breakdown.components {
                        let mut refreshed = edge.clone();
                        refreshed.components = breakdown.components;
                        refreshed.updated_at = chrono::Utc::now();
                        upserts.push(refreshed);
                        report.updated += 1;
                    } else {
                        report.kept += 1;
                    }
                    continue;
                }
            }

            let breakdown = self.scorer.score(note, &candidate);
            if breakdown.score >= self.accept_threshold {
                let edge_type = if breakdown.components.bridge_tag.is_some() {
                    EdgeType::BridgeTag
                } else {
                    EdgeType::Semantic
                };
                match &existing {
                    Some(edge)
                        if edge.edge_type == edge_type
                            && (edge.score - breakdown.score).abs() < SCORE_EPSILON =>
                    {
                        report.kept += 1;
                    }
                    Some(edge) => {
                        let mut updated = edge.clone();
                        updated.edge_type = edge_type;
                        updated.semantic_score = breakdown.semantic_score;
                        updated.tag_score = breakdown.tag_score;
                        updated.score = breakdown.score;
                        updated.components = breakdown.components.clone();
                        updated.updated_at = chrono::Utc::now();
                        events.push(self.edge_event(
                            EventKind::EdgeUpdated,
                            &updated,
                            note,
                            &candidate,
                            Some(edge.score),
                        ));
                        upserts.push(updated);
                        report.updated += 1;
                    }
                    None => {
                        let edge = Edge::new(note.id.clone(), candidate_id.clone(), edge_type)
                            .with_scores(
                                breakdown.semantic_score,
                                breakdown.tag_score,
                                breakdown.score,
                                breakdown.components.clone(),
                            );
                        events.push(self.edge_event(
                            EventKind::EdgeCreated,
                            &edge,
                            note,
                            &candidate,
                            None,
                        ));
                        upserts.push(edge);
                        report.created += 1;
                    }
                }
            } else if let Some(edge) = existing {
                // Below accept: auto edges go, including the suggestion band.
                events.push(self.edge_event(
                    EventKind::EdgeDeleted,
                    &edge,
                    note,
                    &candidate,
                    Some(edge.score),
                ));
                removals.push((edge.source_id.clone(), edge.target_id.clone()));
                report.removed += 1;
            }
        }

        if !upserts.is_empty() || !removals.is_empty() {
            self.store.apply_link_changes(&upserts, &removals, &events)?;
            report.events = events;
        }
        debug!(
            note = %note.id,
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            "link pass complete"
        );
        Ok(report)
    }

    fn edge_event(
        &self,
        kind: EventKind,
        edge: &Edge,
        a: &Note,
        b: &Note,
        before_score: Option<f32>,
    ) -> DomainEvent {
        let mut tags: Vec<String> = a.tags.iter().chain(b.tags.iter()).cloned().collect();
        tags.sort();
        tags.dedup();
        DomainEvent::new(
            kind,
            vec![edge.source_id.clone(), edge.target_id.clone()],
            tags,
        )
        .with_payload(json!({
            "edge_id": edge.id.as_str(),
            "source_id": edge.source_id.as_str(),
            "target_id": edge.target_id.as_str(),
            "edge_type": edge.edge_type.to_string(),
            "before_score": before_score,
            "after_score": if kind == EventKind::EdgeDeleted { None } else { Some(edge.score) },
        }))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;
    use crate::graph::Note;
    use crate::ingest::normalize;
    use crate::store::SqliteStore;

    fn config() -> ForestConfig {
        ForestConfig {
            embed_dimension: 3,
            ..Default::default()
        }
    }

    fn setup() -> (Arc<SqliteStore>, LinkingEngine) {
        let config = config();
        let store = Arc::new(SqliteStore::open_in_memory(&config).unwrap());
        let engine = LinkingEngine::new(store.clone(), &config);
        (store, engine)
    }

    fn put_note(
        store: &SqliteStore,
        title: &str,
        body: &str,
        embedding: Option<Vec<f32>>,
    ) -> Note {
        let n = normalize(title, body, &[]);
        let mut note = Note::new(title, body);
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        if let Some(v) = embedding {
            note = note.with_embedding(v, "mock:deterministic");
        }
        store.put_note(&note, &[]).unwrap();
        note
    }

    #[test]
    fn links_similar_notes_above_accept() {
        let (store, engine) = setup();
        let a = put_note(
            &store,
            "Anadromous fish migration",
            "Salmon migration #ecology #rivers",
            Some(vec![1.0, 0.0, 0.0]),
        );
        let b = put_note(
            &store,
            "Columbia river salmon runs",
            "Salmon runs #ecology #rivers",
            Some(vec![1.0, 0.0, 0.0]),
        );
        let report = engine.link_one(&a.id).unwrap();
        assert_eq!(report.created, 1);

        let edge = store.edge_between(&a.id, &b.id).unwrap().unwrap();
        assert_eq!(edge.tag_score, 1.0);
        assert!((edge.components.embedding_similarity - 1.0).abs() < 1e-6);
        assert!(edge.score >= 0.60);
    }

    #[test]
    fn link_one_is_idempotent() {
        let (store, engine) = setup();
        let a = put_note(&store, "Salmon", "#ecology salmon", Some(vec![1.0, 0.0, 0.0]));
        put_note(&store, "Rivers", "#ecology salmon", Some(vec![1.0, 0.0, 0.0]));

        engine.link_one(&a.id).unwrap();
        let edges_first = store.all_edges().unwrap();
        let cursor = store.event_cursor().unwrap();

        let report = engine.link_one(&a.id).unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.removed, 0);
        let edges_second = store.all_edges().unwrap();
        assert_eq!(edges_first.len(), edges_second.len());
        assert_eq!(edges_first[0].id, edges_second[0].id);
        // No new events either.
        assert_eq!(store.event_cursor().unwrap(), cursor);
    }

    #[test]
    fn dissimilar_notes_stay_unlinked() {
        let (store, engine) = setup();
        let a = put_note(&store, "Salmon", "fish #ecology", Some(vec![1.0, 0.0, 0.0]));
        let b = put_note(&store, "Taxes", "accounting #finance", Some(vec![0.0, 0.0, 1.0]));
        engine.link_one(&a.id).unwrap();
        assert!(store.edge_between(&a.id, &b.id).unwrap().is_none());
    }

    #[test]
    fn falling_below_accept_removes_the_edge() {
        let (store, engine) = setup();
        let a = put_note(&store, "Salmon", "salmon #ecology", Some(vec![1.0, 0.0, 0.0]));
        let mut b = put_note(&store, "Rivers", "salmon #ecology", Some(vec![1.0, 0.0, 0.0]));
        engine.link_one(&a.id).unwrap();
        assert!(store.edge_between(&a.id, &b.id).unwrap().is_some());

        // Rewrite B to unrelated content with an orthogonal embedding.
        let n = normalize("Rivers", "quarterly tax ledger", &[]);
        b.body = "quarterly tax ledger".to_string();
        b.tags = n.tags;
        b.token_counts = n.token_counts;
        b.embedding = Some(vec![0.0, 0.0, 1.0]);
        store.put_note(&b, &[]).unwrap();

        engine.link_incremental(&b.id).unwrap();
        assert!(store.edge_between(&a.id, &b.id).unwrap().is_none());
        // Nothing below accept touches B.
        for edge in store.edges_for(&b.id).unwrap() {
            assert!(edge.score >= 0.60 || !edge.edge_type.is_auto());
        }
    }

    #[test]
    fn manual_edges_survive_rescore() {
        let (store, engine) = setup();
        let a = put_note(&store, "Salmon", "fish", Some(vec![1.0, 0.0, 0.0]));
        let b = put_note(&store, "Taxes", "money", Some(vec![0.0, 0.0, 1.0]));
        let manual = Edge::new(a.id.clone(), b.id.clone(), EdgeType::Manual);
        store.upsert_edge(&manual, &[]).unwrap();

        engine.link_one(&a.id).unwrap();
        let edge = store.edge_between(&a.id, &b.id).unwrap().unwrap();
        assert_eq!(edge.edge_type, EdgeType::Manual);
    }

    #[test]
    fn shared_bridge_tag_labels_edge_type() {
        let (store, engine) = setup();
        let a = put_note(
            &store,
            "Salmon",
            "salmon rivers #link/migration #ecology",
            Some(vec![1.0, 0.0, 0.0]),
        );
        let b = put_note(
            &store,
            "Eels",
            "salmon rivers #link/migration #ecology",
            Some(vec![1.0, 0.0, 0.0]),
        );
        engine.link_one(&a.id).unwrap();
        let edge = store.edge_between(&a.id, &b.id).unwrap().unwrap();
        assert_eq!(edge.edge_type, EdgeType::BridgeTag);
        assert_eq!(
            edge.components.bridge_tag.as_deref(),
            Some("link/migration")
        );
    }

    #[test]
    fn suggestions_cover_the_band_without_persisting() {
        let config = ForestConfig {
            embed_dimension: 3,
            accept_threshold: 0.9,
            suggest_threshold: 0.2,
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory(&config).unwrap());
        let engine = LinkingEngine::new(store.clone(), &config);

        let a = put_note(&store, "Salmon", "salmon fish #ecology", Some(vec![1.0, 0.0, 0.0]));
        put_note(
            &store,
            "Trout",
            "trout fish #ecology",
            Some(vec![0.8, 0.6, 0.0]),
        );
        engine.link_one(&a.id).unwrap();

        let suggestions = engine.suggestions(&a.id, 10).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].breakdown.score < 0.9);
        assert!(suggestions[0].breakdown.score >= 0.2);
        // The band did not mutate the graph.
        assert_eq!(store.count_edges().unwrap(), 0);
    }

    #[test]
    fn absent_embedding_degrades_gracefully() {
        let (store, engine) = setup();
        let a = put_note(&store, "Salmon", "salmon #ecology", None);
        put_note(&store, "Rivers", "rivers #hydrology", None);
        let report = engine.link_one(&a.id).unwrap();
        // Scores exist (lexical+tag only), nothing crashes.
        assert_eq!(report.candidates_scored, 1);
    }
}
