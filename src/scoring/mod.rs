//! Pure pairwise scorer
//!
//! `score(a, b)` is symmetric and deterministic: identical inputs give
//! identical outputs, with no I/O and no state. Weight constants live in
//! configuration; changing them requires an admin rescore but changes no
//! identities.

use crate::config::ScoreWeights;
use crate::graph::{Note, ScoreComponents};
use crate::ingest::title_tokens;
use std::collections::BTreeMap;

/// Full result of scoring one unordered pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub semantic_score: f32,
    pub tag_score: f32,
    /// Aggregate in [0,1] used for ranking and the threshold policy.
    pub score: f32,
    pub components: ScoreComponents,
}

/// Pairwise scorer parameterized by weights and the bridge-tag pattern.
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoreWeights,
    bridge_pattern: BridgeTagPattern,
}

impl Scorer {
    pub fn new(weights: ScoreWeights, bridge_tag_pattern: &str) -> Self {
        Self {
            weights,
            bridge_pattern: BridgeTagPattern::parse(bridge_tag_pattern),
        }
    }

    /// Score a pair of notes. Component fields and aggregates are
    /// identical under argument swap.
    pub fn score(&self, a: &Note, b: &Note) -> ScoreBreakdown {
        let embedding_similarity = match (&a.embedding, &b.embedding) {
            (Some(va), Some(vb)) if va.len() == vb.len() => {
                // Unit vectors: map cosine from [-1,1] into [0,1].
                (cosine(va, vb) + 1.0) / 2.0
            }
            _ => 0.0,
        };

        let token_similarity = weighted_jaccard(&a.token_counts, &b.token_counts);

        let title_a = title_tokens(&a.title);
        let title_b = title_tokens(&b.title);
        let title_similarity = set_jaccard(
            title_a.iter().map(String::as_str),
            title_b.iter().map(String::as_str),
        );

        let shared_tags: Vec<String> = a
            .tags
            .iter()
            .filter(|t| b.tags.binary_search(t).is_ok())
            .cloned()
            .collect();
        let union_len = a.tags.len() + b.tags.len() - shared_tags.len();
        let tag_overlap = if union_len == 0 {
            0.0
        } else {
            shared_tags.len() as f32 / union_len as f32
        };
        let bridge_tag = shared_tags
            .iter()
            .find(|t| self.bridge_pattern.matches(t))
            .cloned();

        let w = &self.weights;
        let semantic_score = (w.embedding * embedding_similarity
            + w.token * token_similarity
            + w.title * title_similarity)
            .clamp(0.0, 1.0);
        // tag_score is the plain tag Jaccard; a present bridge tag labels
        // the edge type rather than inflating the score.
        let tag_score = tag_overlap;
        let score = (w.semantic_vs_tag * semantic_score + (1.0 - w.semantic_vs_tag) * tag_score)
            .clamp(0.0, 1.0);

        ScoreBreakdown {
            semantic_score,
            tag_score,
            score,
            components: ScoreComponents {
                embedding_similarity,
                token_similarity,
                title_similarity,
                tag_overlap,
                shared_tags,
                bridge_tag,
            },
        }
    }
}

/// Dot product of two equal-length vectors. Inputs are unit-norm, so
/// this is the cosine.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Weighted Jaccard over count bags: sum of per-token minima over sum of
/// per-token maxima.
fn weighted_jaccard(a: &BTreeMap<String, u32>, b: &BTreeMap<String, u32>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let mut min_sum: u64 = 0;
    let mut max_sum: u64 = 0;
    for (token, &ca) in a {
        let cb = b.get(token).copied().unwrap_or(0);
        min_sum += ca.min(cb) as u64;
        max_sum += ca.max(cb) as u64;
    }
    for (token, &cb) in b {
        if !a.contains_key(token) {
            max_sum += cb as u64;
        }
    }
    if max_sum == 0 {
        0.0
    } else {
        min_sum as f32 / max_sum as f32
    }
}

fn set_jaccard<'a>(
    a: impl Iterator<Item = &'a str>,
    b: impl Iterator<Item = &'a str>,
) -> f32 {
    let sa: std::collections::BTreeSet<&str> = a.collect();
    let sb: std::collections::BTreeSet<&str> = b.collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

/// Bridge-tag pattern: a literal tag name, or a namespace prefix with a
/// trailing `*` (e.g. `link/*`).
#[derive(Debug, Clone)]
pub enum BridgeTagPattern {
    Literal(String),
    Prefix(String),
}

impl BridgeTagPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => BridgeTagPattern::Prefix(prefix.to_lowercase()),
            None => BridgeTagPattern::Literal(pattern.to_lowercase()),
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        match self {
            BridgeTagPattern::Literal(name) => tag == name,
            BridgeTagPattern::Prefix(prefix) => tag.starts_with(prefix.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoreWeights;
    use crate::graph::Note;
    use crate::ingest::normalize;

    fn note(title: &str, body: &str, tags: &[&str]) -> Note {
        let explicit: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let n = normalize(title, body, &explicit);
        let mut note = Note::new(title, body);
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        note
    }

    fn scorer() -> Scorer {
        Scorer::new(ScoreWeights::default(), "link/*")
    }

    #[test]
    fn scoring_is_symmetric() {
        let a = note("Anadromous fish migration", "Salmon travel up rivers #ecology", &[]);
        let mut b = note("Columbia river salmon", "Salmon runs in the Columbia #ecology", &[]);
        let mut a2 = a.clone();
        a2.embedding = Some(vec![1.0, 0.0, 0.0]);
        b.embedding = Some(vec![0.6, 0.8, 0.0]);

        let ab = scorer().score(&a2, &b);
        let ba = scorer().score(&b, &a2);
        assert_eq!(ab, ba);
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let a = note("t", "body #x", &[]);
        let b = note("u", "other #x", &[]);
        let s = scorer();
        assert_eq!(s.score(&a, &b), s.score(&a, &b));
    }

    #[test]
    fn absent_embedding_forces_zero_embedding_similarity() {
        let a = note("a", "alpha", &[]);
        let mut b = note("b", "beta", &[]);
        b.embedding = Some(vec![1.0, 0.0]);
        let result = scorer().score(&a, &b);
        assert_eq!(result.components.embedding_similarity, 0.0);
    }

    #[test]
    fn equal_unit_vectors_map_to_one() {
        let mut a = note("a", "x", &[]);
        let mut b = note("b", "y", &[]);
        a.embedding = Some(vec![0.6, 0.8]);
        b.embedding = Some(vec![0.6, 0.8]);
        let result = scorer().score(&a, &b);
        assert!((result.components.embedding_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn identical_tag_sets_give_full_tag_score() {
        let a = note("a", "#ecology #rivers", &[]);
        let b = note("b", "#ecology #rivers", &[]);
        let result = scorer().score(&a, &b);
        assert_eq!(result.tag_score, 1.0);
        assert_eq!(result.components.shared_tags, vec!["ecology", "rivers"]);
    }

    #[test]
    fn bridge_tag_detected_by_pattern() {
        let a = note("a", "#link/salmon #ecology", &[]);
        let b = note("b", "#link/salmon", &[]);
        let result = scorer().score(&a, &b);
        assert_eq!(result.components.bridge_tag.as_deref(), Some("link/salmon"));
    }

    #[test]
    fn no_bridge_bonus_in_tag_score() {
        let a = note("a", "#link/x #one #two #three", &[]);
        let b = note("b", "#link/x", &[]);
        let result = scorer().score(&a, &b);
        // 1 shared of 4 union — the bridge tag does not inflate it.
        assert!((result.tag_score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn weighted_jaccard_of_disjoint_bags_is_zero() {
        let a = note("a", "alpha bravo", &[]);
        let b = note("b", "charlie delta", &[]);
        let result = scorer().score(&a, &b);
        assert_eq!(result.components.token_similarity, 0.0);
    }

    #[test]
    fn weighted_jaccard_counts_multiplicity() {
        let mut a = BTreeMap::new();
        a.insert("salmon".to_string(), 3u32);
        let mut b = BTreeMap::new();
        b.insert("salmon".to_string(), 1u32);
        assert!((weighted_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut a = note("same title words", "same body #t1 #t2", &[]);
        let mut b = note("same title words", "same body #t1 #t2", &[]);
        a.embedding = Some(vec![1.0, 0.0]);
        b.embedding = Some(vec![1.0, 0.0]);
        let result = scorer().score(&a, &b);
        assert!(result.score <= 1.0 && result.score >= 0.0);
        assert!(result.score > 0.9, "identical notes should score high");
    }
}
