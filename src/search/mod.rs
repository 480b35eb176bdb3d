//! Search: semantic k-NN, metadata filtering, neighborhood expansion

use crate::embed::EmbeddingProvider;
use crate::error::ForestResult;
use crate::graph::{CreatedBy, Edge, Note, NoteId, Origin};
use crate::store::SqliteStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Parameters for [`Search::semantic`].
#[derive(Debug, Clone)]
pub struct SemanticSearchParams {
    pub limit: usize,
    pub offset: usize,
    pub min_score: f32,
    /// When set, results must carry every listed tag.
    pub tags: Option<Vec<String>>,
}

impl Default for SemanticSearchParams {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            min_score: 0.0,
            tags: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub note_id: NoteId,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct SemanticSearchResult {
    pub hits: Vec<SearchHit>,
    /// Matches before pagination.
    pub total: usize,
    /// True when the query could not be embedded and metadata search
    /// answered instead.
    pub used_fallback: bool,
}

/// Sort orders for metadata search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Degree-weighted: best-connected first, recency breaking ties.
    Score,
    #[default]
    Recent,
    Degree,
}

/// Conjunctive filters for metadata search. Unset fields match all.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub id: Option<NoteId>,
    pub title: Option<String>,
    /// Case-insensitive substring over title+tags+body.
    pub term: Option<String>,
    pub tags_all: Vec<String>,
    pub tags_any: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub origin: Option<Origin>,
    pub created_by: Option<CreatedBy>,
    pub sort: SortOrder,
    /// Chunk notes are hidden unless explicitly requested.
    pub show_chunks: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// A neighborhood expansion around a center note.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub center: NoteId,
    pub notes: Vec<Note>,
    /// Edges with both endpoints among `notes`.
    pub edges: Vec<Edge>,
}

pub struct Search {
    store: Arc<SqliteStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl Search {
    pub fn new(store: Arc<SqliteStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, provider }
    }

    /// Semantic nearest-neighbor over stored embeddings, answered by
    /// the store's KNN query (vec0-indexed under the `embeddings`
    /// feature). `total` counts matches within the candidate pool,
    /// which is padded well past the requested page. Falls back to
    /// metadata search over the query terms when the query cannot be
    /// embedded.
    pub async fn semantic(
        &self,
        query: &str,
        params: &SemanticSearchParams,
    ) -> ForestResult<SemanticSearchResult> {
        let Some(query_vector) = self.provider.embed(query).await? else {
            let notes = self.metadata(&MetadataFilter {
                term: Some(query.to_string()),
                limit: Some(params.limit),
                offset: params.offset,
                ..Default::default()
            })?;
            let total = notes.len();
            return Ok(SemanticSearchResult {
                hits: notes
                    .into_iter()
                    .map(|note| SearchHit {
                        note_id: note.id,
                        similarity: 0.0,
                    })
                    .collect(),
                total,
                used_fallback: true,
            });
        };

        let notes: HashMap<String, Note> = self
            .store
            .all_notes()?
            .into_iter()
            .map(|n| (n.id.to_string(), n))
            .collect();

        // Candidate pool padded past the requested page so the tag and
        // min-score filters have slack.
        let pool = (params.offset + params.limit)
            .saturating_mul(4)
            .clamp(128, 4096);

        let mut scored: Vec<(SearchHit, DateTime<Utc>)> = Vec::new();
        for (id, similarity) in self.store.nearest_embeddings(&query_vector, pool)? {
            let Some(note) = notes.get(id.as_str()) else {
                continue;
            };
            if let Some(required) = &params.tags {
                if !required.iter().all(|t| note.tags.contains(t)) {
                    continue;
                }
            }
            if similarity < params.min_score {
                continue;
            }
            scored.push((
                SearchHit {
                    note_id: id,
                    similarity,
                },
                note.updated_at,
            ));
        }

        // similarity desc, updated_at desc, id asc
        scored.sort_by(|(a, a_at), (b, b_at)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_at.cmp(a_at))
                .then_with(|| a.note_id.cmp(&b.note_id))
        });

        let total = scored.len();
        let hits = scored
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .map(|(hit, _)| hit)
            .collect();
        Ok(SemanticSearchResult {
            hits,
            total,
            used_fallback: false,
        })
    }

    /// Notes satisfying every provided filter, sorted per `sort`.
    pub fn metadata(&self, filter: &MetadataFilter) -> ForestResult<Vec<Note>> {
        let term = filter.term.as_ref().map(|t| t.to_lowercase());
        let title = filter.title.as_ref().map(|t| t.to_lowercase());

        let mut matched: Vec<Note> = Vec::new();
        for note in self.store.all_notes()? {
            if let Some(id) = &filter.id {
                if &note.id != id {
                    continue;
                }
            }
            if !filter.show_chunks && note.metadata.is_chunk {
                continue;
            }
            if let Some(title) = &title {
                if note.title.to_lowercase() != *title {
                    continue;
                }
            }
            if let Some(term) = &term {
                let haystack = format!(
                    "{}\n{}\n{}",
                    note.title.to_lowercase(),
                    note.tags.join(" "),
                    note.body.to_lowercase()
                );
                if !haystack.contains(term.as_str()) {
                    continue;
                }
            }
            if !filter.tags_all.iter().all(|t| note.tags.contains(t)) {
                continue;
            }
            if !filter.tags_any.is_empty()
                && !filter.tags_any.iter().any(|t| note.tags.contains(t))
            {
                continue;
            }
            if let Some(since) = filter.since {
                if note.updated_at < since {
                    continue;
                }
            }
            if let Some(until) = filter.until {
                if note.updated_at > until {
                    continue;
                }
            }
            if let Some(origin) = filter.origin {
                if note.metadata.origin != origin {
                    continue;
                }
            }
            if let Some(created_by) = &filter.created_by {
                if &note.metadata.created_by != created_by {
                    continue;
                }
            }
            matched.push(note);
        }

        match filter.sort {
            SortOrder::Recent => {
                matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
            }
            SortOrder::Degree | SortOrder::Score => {
                let mut degrees: BTreeMap<String, u64> = BTreeMap::new();
                for note in &matched {
                    degrees.insert(note.id.to_string(), self.store.degree(&note.id)?);
                }
                matched.sort_by(|a, b| {
                    degrees[b.id.as_str()]
                        .cmp(&degrees[a.id.as_str()])
                        .then_with(|| b.updated_at.cmp(&a.updated_at))
                        .then_with(|| a.id.cmp(&b.id))
                });
            }
        }

        let out: Vec<Note> = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(out)
    }

    /// BFS from `center` over current edges up to `depth` hops (1 or 2),
    /// highest-score edges first. The center is always included;
    /// farthest nodes are dropped first when trimming to `limit`.
    pub fn neighborhood(
        &self,
        center: &NoteId,
        depth: usize,
        limit: usize,
    ) -> ForestResult<Neighborhood> {
        let depth = depth.clamp(1, 2);
        let mut kept: Vec<NoteId> = vec![center.clone()];
        let mut seen: BTreeSet<NoteId> = BTreeSet::new();
        seen.insert(center.clone());
        let mut frontier: VecDeque<(NoteId, usize)> = VecDeque::new();
        frontier.push_back((center.clone(), 0));

        while let Some((current, hops)) = frontier.pop_front() {
            if hops == depth {
                continue;
            }
            // edges_for returns score-descending order, which makes the
            // BFS visit strong neighbors first.
            for edge in self.store.edges_for(&current)? {
                let Some(other) = edge.other_endpoint(&current) else {
                    continue;
                };
                if seen.insert(other.clone()) {
                    kept.push(other.clone());
                    frontier.push_back((other.clone(), hops + 1));
                }
            }
        }

        kept.truncate(limit.max(1));
        let kept_set: BTreeSet<&NoteId> = kept.iter().collect();

        let mut notes = Vec::with_capacity(kept.len());
        for id in &kept {
            if let Some(note) = self.store.get_note(id)? {
                notes.push(note);
            }
        }
        let edges: Vec<Edge> = self
            .store
            .all_edges()?
            .into_iter()
            .filter(|e| kept_set.contains(&e.source_id) && kept_set.contains(&e.target_id))
            .collect();

        Ok(Neighborhood {
            center: center.clone(),
            notes,
            edges,
        })
    }
}
