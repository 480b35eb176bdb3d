//! Context / topology summaries for agent consumption
//!
//! A cluster seeded by tag or query is expanded one hop and classified
//! into hubs (top degree), bridges (articulation points or bridge-tag
//! carriers spanning clusters), and periphery. The emitted view is
//! truncated to a token budget, hubs first.

use crate::error::{ForestError, ForestResult};
use crate::graph::{Edge, Note, NoteId};
use crate::scoring::BridgeTagPattern;
use crate::search::{Search, SemanticSearchParams};
use crate::store::SqliteStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Seeds from top-k semantic hits when a query is given.
const QUERY_SEED_LIMIT: usize = 10;

/// Rough chars-per-token heuristic used against the budget.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ContextParams {
    pub tag: Option<String>,
    pub query: Option<String>,
    /// Token budget for the emitted text.
    pub budget: usize,
}

/// One classified note in the summary.
#[derive(Debug, Clone)]
pub struct TopologyNote {
    pub note_id: NoteId,
    pub title: String,
    pub tags: Vec<String>,
    /// Degree within the expansion, not the whole graph.
    pub degree: usize,
}

#[derive(Debug, Clone)]
pub struct ContextSummary {
    pub hubs: Vec<TopologyNote>,
    pub bridges: Vec<TopologyNote>,
    pub periphery: Vec<TopologyNote>,
    /// Budgeted text view of the three classes.
    pub rendered: String,
    pub token_estimate: usize,
    pub truncated: bool,
}

pub struct ContextBuilder {
    store: Arc<SqliteStore>,
    search: Arc<Search>,
    bridge_pattern: BridgeTagPattern,
}

impl ContextBuilder {
    pub fn new(store: Arc<SqliteStore>, search: Arc<Search>, bridge_tag_pattern: &str) -> Self {
        Self {
            store,
            search,
            bridge_pattern: BridgeTagPattern::parse(bridge_tag_pattern),
        }
    }

    pub async fn context(&self, params: &ContextParams) -> ForestResult<ContextSummary> {
        if params.tag.is_none() && params.query.is_none() {
            return Err(ForestError::ValidationFailed(
                "context requires a tag or a query".to_string(),
            ));
        }

        // Seed set: tag carriers ∪ top-k semantic hits.
        let mut seeds: BTreeSet<NoteId> = BTreeSet::new();
        if let Some(tag) = &params.tag {
            for id in self.store.notes_with_tag(&tag.to_lowercase())? {
                seeds.insert(id);
            }
        }
        if let Some(query) = &params.query {
            let result = self
                .search
                .semantic(
                    query,
                    &SemanticSearchParams {
                        limit: QUERY_SEED_LIMIT,
                        ..Default::default()
                    },
                )
                .await?;
            for hit in result.hits {
                seeds.insert(hit.note_id);
            }
        }

        // 1-hop expansion.
        let mut expansion: BTreeSet<NoteId> = seeds.clone();
        for seed in &seeds {
            for edge in self.store.edges_for(seed)? {
                if let Some(other) = edge.other_endpoint(seed) {
                    expansion.insert(other.clone());
                }
            }
        }

        let subgraph_edges: Vec<Edge> = self
            .store
            .all_edges()?
            .into_iter()
            .filter(|e| expansion.contains(&e.source_id) && expansion.contains(&e.target_id))
            .collect();

        let mut degree: BTreeMap<&NoteId, usize> = expansion.iter().map(|id| (id, 0)).collect();
        for edge in &subgraph_edges {
            *degree.get_mut(&edge.source_id).unwrap() += 1;
            *degree.get_mut(&edge.target_id).unwrap() += 1;
        }

        let mut notes: BTreeMap<NoteId, Note> = BTreeMap::new();
        for id in &expansion {
            if let Some(note) = self.store.get_note(id)? {
                notes.insert(id.clone(), note);
            }
        }

        // Hubs: top-degree fifth of the expansion, at least one.
        let mut by_degree: Vec<&NoteId> = expansion.iter().collect();
        by_degree.sort_by(|a, b| degree[*b].cmp(&degree[*a]).then_with(|| a.cmp(b)));
        let hub_count = (expansion.len() / 5).clamp(1, 5);
        let hubs: BTreeSet<NoteId> = by_degree
            .iter()
            .take(hub_count)
            .filter(|id| degree[*id] > 0)
            .map(|id| (*id).clone())
            .collect();

        // Bridges: articulation points, plus bridge-tag carriers that
        // actually connect (degree >= 2). Hubs win when both apply.
        let articulation = articulation_points(&expansion, &subgraph_edges);
        let mut bridges: BTreeSet<NoteId> = BTreeSet::new();
        for id in &expansion {
            if hubs.contains(id) {
                continue;
            }
            let is_articulation = articulation.contains(id);
            let carries_bridge_tag = notes
                .get(id)
                .is_some_and(|n| n.tags.iter().any(|t| self.bridge_pattern.matches(t)));
            if is_articulation || (carries_bridge_tag && degree[id] >= 2) {
                bridges.insert(id.clone());
            }
        }

        let classify = |ids: &BTreeSet<NoteId>| -> Vec<TopologyNote> {
            let mut out: Vec<TopologyNote> = ids
                .iter()
                .filter_map(|id| notes.get(id))
                .map(|note| TopologyNote {
                    note_id: note.id.clone(),
                    title: note.title.clone(),
                    tags: note.tags.clone(),
                    degree: degree[&note.id],
                })
                .collect();
            out.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.note_id.cmp(&b.note_id)));
            out
        };

        let periphery_ids: BTreeSet<NoteId> = expansion
            .iter()
            .filter(|id| !hubs.contains(*id) && !bridges.contains(*id))
            .cloned()
            .collect();

        let hubs = classify(&hubs);
        let bridges = classify(&bridges);
        let periphery = classify(&periphery_ids);

        let (rendered, token_estimate, truncated) =
            render(&hubs, &bridges, &periphery, params.budget);

        Ok(ContextSummary {
            hubs,
            bridges,
            periphery,
            rendered,
            token_estimate,
            truncated,
        })
    }
}

/// Budgeted emission: hubs, then bridges, then periphery. Lines past
/// the budget are dropped and flagged.
fn render(
    hubs: &[TopologyNote],
    bridges: &[TopologyNote],
    periphery: &[TopologyNote],
    budget: usize,
) -> (String, usize, bool) {
    let mut out = String::new();
    let mut truncated = false;
    let budget_chars = budget.saturating_mul(CHARS_PER_TOKEN);

    for (header, class) in [
        ("## Hubs", hubs),
        ("## Bridges", bridges),
        ("## Periphery", periphery),
    ] {
        if class.is_empty() {
            continue;
        }
        let mut section = format!("{header}\n");
        for note in class {
            section.push_str(&format!(
                "- {} ({}) [{} links]\n",
                note.title,
                note.tags.join(", "),
                note.degree
            ));
        }
        if out.len() + section.len() > budget_chars {
            // Partial section: keep whole lines while they fit.
            for line in section.lines() {
                if out.len() + line.len() + 1 > budget_chars {
                    truncated = true;
                    break;
                }
                out.push_str(line);
                out.push('\n');
            }
            if truncated {
                break;
            }
        } else {
            out.push_str(&section);
        }
    }

    let token_estimate = out.len() / CHARS_PER_TOKEN;
    (out, token_estimate, truncated)
}

/// Articulation points of an undirected graph, iterative Tarjan.
fn articulation_points(nodes: &BTreeSet<NoteId>, edges: &[Edge]) -> BTreeSet<NoteId> {
    let index: BTreeMap<&NoteId, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
    let n = nodes.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for edge in edges {
        let (Some(&u), Some(&v)) = (index.get(&edge.source_id), index.get(&edge.target_id))
        else {
            continue;
        };
        if u != v {
            adjacency[u].push(v);
            adjacency[v].push(u);
        }
    }

    let mut disc = vec![usize::MAX; n];
    let mut low = vec![0usize; n];
    let mut parent = vec![usize::MAX; n];
    let mut is_articulation = vec![false; n];
    let mut timer = 0usize;

    for root in 0..n {
        if disc[root] != usize::MAX {
            continue;
        }
        // (node, neighbor cursor)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        let mut root_children = 0usize;
        disc[root] = timer;
        low[root] = timer;
        timer += 1;

        while let Some(frame) = stack.last_mut() {
            let u = frame.0;
            if frame.1 < adjacency[u].len() {
                let v = adjacency[u][frame.1];
                frame.1 += 1;
                if disc[v] == usize::MAX {
                    parent[v] = u;
                    if u == root {
                        root_children += 1;
                    }
                    disc[v] = timer;
                    low[v] = timer;
                    timer += 1;
                    stack.push((v, 0));
                } else if v != parent[u] {
                    low[u] = low[u].min(disc[v]);
                }
            } else {
                stack.pop();
                if let Some(&(p, _)) = stack.last() {
                    low[p] = low[p].min(low[u]);
                    if p != root && low[u] >= disc[p] {
                        is_articulation[p] = true;
                    }
                }
            }
        }
        if root_children > 1 {
            is_articulation[root] = true;
        }
    }

    nodes
        .iter()
        .zip(is_articulation.iter())
        .filter(|(_, &flag)| flag)
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;
    use crate::embed::MockProvider;
    use crate::graph::{EdgeType, Note};
    use crate::ingest::normalize;

    fn setup() -> (Arc<SqliteStore>, ContextBuilder) {
        let config = ForestConfig {
            embed_dimension: 3,
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory(&config).unwrap());
        let provider = Arc::new(MockProvider::new(3));
        let search = Arc::new(Search::new(store.clone(), provider));
        let builder = ContextBuilder::new(store.clone(), search, "link/*");
        (store, builder)
    }

    fn put(store: &SqliteStore, title: &str, body: &str) -> Note {
        let n = normalize(title, body, &[]);
        let mut note = Note::new(title, body);
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        store.put_note(&note, &[]).unwrap();
        note
    }

    fn link(store: &SqliteStore, a: &Note, b: &Note) {
        store
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::Manual), &[])
            .unwrap();
    }

    #[tokio::test]
    async fn requires_tag_or_query() {
        let (_, builder) = setup();
        let err = builder
            .context(&ContextParams {
                tag: None,
                query: None,
                budget: 100,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForestError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn hub_is_the_best_connected_note() {
        let (store, builder) = setup();
        let hub = put(&store, "Hub", "#topic center");
        let a = put(&store, "A", "#topic a");
        let b = put(&store, "B", "#topic b");
        let c = put(&store, "C", "#topic c");
        link(&store, &hub, &a);
        link(&store, &hub, &b);
        link(&store, &hub, &c);

        let summary = builder
            .context(&ContextParams {
                tag: Some("topic".to_string()),
                query: None,
                budget: 500,
            })
            .await
            .unwrap();
        assert_eq!(summary.hubs.len(), 1);
        assert_eq!(summary.hubs[0].note_id, hub.id);
        assert!(!summary.truncated);
    }

    #[tokio::test]
    async fn articulation_point_is_a_bridge() {
        let (store, builder) = setup();
        // Star component claims the hub slot; p - m - q leaves m as an
        // articulation point in its own component.
        let hub = put(&store, "Hub", "#topic hub");
        for name in ["X1", "X2", "X3", "X4"] {
            let x = put(&store, name, "#topic x");
            link(&store, &hub, &x);
        }
        let p = put(&store, "P", "#topic p");
        let m = put(&store, "Middle", "#topic m");
        let q = put(&store, "Q", "#topic q");
        link(&store, &p, &m);
        link(&store, &m, &q);

        let summary = builder
            .context(&ContextParams {
                tag: Some("topic".to_string()),
                query: None,
                budget: 500,
            })
            .await
            .unwrap();
        assert!(summary.hubs.iter().any(|n| n.note_id == hub.id));
        assert!(summary.bridges.iter().any(|n| n.note_id == m.id));
    }

    #[tokio::test]
    async fn budget_truncates_output() {
        let (store, builder) = setup();
        for i in 0..20 {
            put(&store, &format!("Note number {i}"), "#topic body");
        }
        let summary = builder
            .context(&ContextParams {
                tag: Some("topic".to_string()),
                query: None,
                budget: 10,
            })
            .await
            .unwrap();
        assert!(summary.truncated);
        assert!(summary.token_estimate <= 10);
    }

    #[test]
    fn articulation_points_on_a_path() {
        let ids: Vec<NoteId> = (0..3).map(|i| NoteId::from_string(format!("n{i}"))).collect();
        let nodes: BTreeSet<NoteId> = ids.iter().cloned().collect();
        let edges = vec![
            Edge::new(ids[0].clone(), ids[1].clone(), EdgeType::Manual),
            Edge::new(ids[1].clone(), ids[2].clone(), EdgeType::Manual),
        ];
        let points = articulation_points(&nodes, &edges);
        assert_eq!(points.len(), 1);
        assert!(points.contains(&ids[1]));
    }

    #[test]
    fn cycle_has_no_articulation_points() {
        let ids: Vec<NoteId> = (0..3).map(|i| NoteId::from_string(format!("n{i}"))).collect();
        let nodes: BTreeSet<NoteId> = ids.iter().cloned().collect();
        let edges = vec![
            Edge::new(ids[0].clone(), ids[1].clone(), EdgeType::Manual),
            Edge::new(ids[1].clone(), ids[2].clone(), EdgeType::Manual),
            Edge::new(ids[2].clone(), ids[0].clone(), EdgeType::Manual),
        ];
        assert!(articulation_points(&nodes, &edges).is_empty());
    }
}
