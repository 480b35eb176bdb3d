//! Edge representation — undirected weighted links between notes

use super::note::NoteId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
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

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edge classification.
///
/// Structural and manual edges are exempt from the threshold policy and
/// never removed by rescoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeType {
    Semantic,
    StructuralParent,
    StructuralSequential,
    BridgeTag,
    Manual,
}

impl EdgeType {
    /// Whether the linking engine may create or remove edges of this
    /// type under the threshold policy.
    pub fn is_auto(&self) -> bool {
        matches!(self, EdgeType::Semantic | EdgeType::BridgeTag)
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EdgeType::StructuralParent | EdgeType::StructuralSequential
        )
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(EdgeType::Semantic),
            "structural-parent" => Ok(EdgeType::StructuralParent),
            "structural-sequential" => Ok(EdgeType::StructuralSequential),
            "bridge-tag" => Ok(EdgeType::BridgeTag),
            "manual" => Ok(EdgeType::Manual),
            _ => Err(format!("unknown edge type: {}", s)),
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeType::Semantic => "semantic",
            EdgeType::StructuralParent => "structural-parent",
            EdgeType::StructuralSequential => "structural-sequential",
            EdgeType::BridgeTag => "bridge-tag",
            EdgeType::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// Per-signal breakdown persisted with every edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// Cosine similarity mapped into [0,1]; 0 when either embedding is absent.
    pub embedding_similarity: f32,
    /// Weighted Jaccard over token count bags.
    pub token_similarity: f32,
    /// Token-set Jaccard over normalized title tokens.
    pub title_similarity: f32,
    /// Jaccard over tag sets.
    pub tag_overlap: f32,
    /// Intersection of the two tag sets, deterministically sorted.
    pub shared_tags: Vec<String>,
    /// A shared tag matching the configured bridge-tag pattern, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_tag: Option<String>,
}

/// An undirected edge between two notes.
///
/// Endpoints are canonically oriented: `source_id < target_id`
/// lexicographically, which eliminates duplicate pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NoteId,
    pub target_id: NoteId,
    pub edge_type: EdgeType,
    pub semantic_score: f32,
    pub tag_score: f32,
    /// Aggregate used for ranking; derived from the dual scores by the scorer.
    pub score: f32,
    pub components: ScoreComponents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Create an edge with canonical endpoint orientation. Endpoint
    /// order in the arguments does not matter.
    pub fn new(a: NoteId, b: NoteId, edge_type: EdgeType) -> Self {
        let (source_id, target_id) = canonical_pair(a, b);
        let now = Utc::now();
        Self {
            id: EdgeId::new(),
            source_id,
            target_id,
            edge_type,
            semantic_score: 0.0,
            tag_score: 0.0,
            score: 0.0,
            components: ScoreComponents::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural edges carry a fixed score and are exempt from the
    /// threshold policy.
    pub fn structural(a: NoteId, b: NoteId, edge_type: EdgeType) -> Self {
        debug_assert!(edge_type.is_structural());
        let mut edge = Self::new(a, b, edge_type);
        edge.semantic_score = 1.0;
        edge.tag_score = 1.0;
        edge.score = 1.0;
        edge
    }

    pub fn with_scores(
        mut self,
        semantic_score: f32,
        tag_score: f32,
        score: f32,
        components: ScoreComponents,
    ) -> Self {
        self.semantic_score = semantic_score;
        self.tag_score = tag_score;
        self.score = score;
        self.components = components;
        self
    }

    /// The endpoint opposite to `id`, if `id` is an endpoint at all.
    pub fn other_endpoint(&self, id: &NoteId) -> Option<&NoteId> {
        if &self.source_id == id {
            Some(&self.target_id)
        } else if &self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }

    pub fn touches(&self, id: &NoteId) -> bool {
        &self.source_id == id || &self.target_id == id
    }
}

/// Canonical unordered-pair orientation: lexicographically smaller id first.
pub fn canonical_pair(a: NoteId, b: NoteId) -> (NoteId, NoteId) {
    if a.as_str() <= b.as_str() {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_canonically_ordered() {
        let a = NoteId::from_string("bbb");
        let b = NoteId::from_string("aaa");
        let edge = Edge::new(a, b, EdgeType::Semantic);
        assert_eq!(edge.source_id.as_str(), "aaa");
        assert_eq!(edge.target_id.as_str(), "bbb");
    }

    #[test]
    fn orientation_is_argument_order_independent() {
        let a = NoteId::from_string("aaa");
        let b = NoteId::from_string("bbb");
        let e1 = Edge::new(a.clone(), b.clone(), EdgeType::Semantic);
        let e2 = Edge::new(b, a, EdgeType::Semantic);
        assert_eq!(e1.source_id, e2.source_id);
        assert_eq!(e1.target_id, e2.target_id);
    }

    #[test]
    fn structural_edges_carry_fixed_score() {
        let edge = Edge::structural(
            NoteId::from_string("a"),
            NoteId::from_string("b"),
            EdgeType::StructuralParent,
        );
        assert_eq!(edge.score, 1.0);
        assert!(!edge.edge_type.is_auto());
    }

    #[test]
    fn edge_type_round_trips_through_display() {
        for t in [
            EdgeType::Semantic,
            EdgeType::StructuralParent,
            EdgeType::StructuralSequential,
            EdgeType::BridgeTag,
            EdgeType::Manual,
        ] {
            assert_eq!(t.to_string().parse::<EdgeType>().unwrap(), t);
        }
    }
}
