//! Text normalizer — tags, token counts, canonical text
//!
//! Pure, no I/O. Lowercasing happens for indexing only; display text is
//! preserved on the note itself.

use std::collections::{BTreeMap, BTreeSet};

/// Stopwords dropped from token counts. Stable across versions; changes
/// bump `config::TOKENIZER_VERSION` and require an admin rescore.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "did", "do", "does",
    "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "just", "me", "my", "no", "not", "of", "on", "or", "our", "she", "so", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "up", "was",
    "we", "were", "what", "when", "where", "which", "who", "will", "with", "you", "your",
];

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The exact string handed to the embedding provider.
    pub canonical_text: String,
    /// Merged hashtag-derived and explicit tags: lowercased, deduped,
    /// sorted.
    pub tags: Vec<String>,
    /// Bag of words from title+body after stopword/punctuation
    /// filtering.
    pub token_counts: BTreeMap<String, u32>,
}

/// Normalize a note's text: extract hashtags, merge explicit tags,
/// tokenize, and produce the canonical embedding text.
pub fn normalize(title: &str, body: &str, explicit_tags: &[String]) -> Normalized {
    let canonical_text = canonical_text(title, body);

    let mut tags: BTreeSet<String> = BTreeSet::new();
    for tag in extract_hashtags(body).chain(extract_hashtags(title)) {
        tags.insert(tag);
    }
    for tag in explicit_tags {
        let folded = tag.trim().trim_start_matches('#').to_lowercase();
        if !folded.is_empty() {
            tags.insert(folded);
        }
    }

    let mut token_counts: BTreeMap<String, u32> = BTreeMap::new();
    for token in tokenize(&canonical_text) {
        *token_counts.entry(token).or_insert(0) += 1;
    }

    Normalized {
        canonical_text,
        tags: tags.into_iter().collect(),
        token_counts,
    }
}

/// The exact text embedded for a note.
pub fn canonical_text(title: &str, body: &str) -> String {
    format!("{}\n\n{}", title, body)
}

/// Tokenize normalized title text alone; used for title similarity.
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    tokenize(title).collect()
}

/// Split on Unicode word boundaries, fold to lowercase, drop stopwords
/// and single characters.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

/// Extract `#hashtag` occurrences. Slash-separated namespaces are
/// allowed (`#link/name`). A `#` only starts a tag at the beginning of
/// the text or after whitespace/punctuation that is not part of a word.
fn extract_hashtags(text: &str) -> impl Iterator<Item = String> + '_ {
    let bytes = text.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' {
            let at_boundary = i == 0
                || text[..i]
                    .chars()
                    .next_back()
                    .is_some_and(|c| !c.is_alphanumeric() && c != '#');
            if at_boundary {
                let rest = &text[i + 1..];
                let end = rest
                    .char_indices()
                    .find(|(_, c)| !(c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '/'))
                    .map(|(idx, _)| idx)
                    .unwrap_or(rest.len());
                let tag = rest[..end].trim_matches('/');
                if !tag.is_empty() {
                    tags.push(tag.to_lowercase());
                }
                i += 1 + end;
                continue;
            }
        }
        i += 1;
    }
    tags.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_joins_title_and_body() {
        assert_eq!(canonical_text("T", "B"), "T\n\nB");
    }

    #[test]
    fn extracts_hashtags_including_namespaced() {
        let n = normalize("Title", "Notes on #ecology and #link/rivers.", &[]);
        assert_eq!(n.tags, vec!["ecology".to_string(), "link/rivers".to_string()]);
    }

    #[test]
    fn hash_inside_word_is_not_a_tag() {
        let n = normalize("", "the c#minor chord", &[]);
        assert!(n.tags.is_empty());
    }

    #[test]
    fn merges_explicit_tags_case_insensitively() {
        let n = normalize("t", "body with #Ecology", &["ECOLOGY".to_string(), "rivers".to_string()]);
        assert_eq!(n.tags, vec!["ecology".to_string(), "rivers".to_string()]);
    }

    #[test]
    fn tags_are_sorted_deterministically() {
        let n = normalize("t", "#zebra #apple #mango", &[]);
        assert_eq!(n.tags, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn token_counts_fold_case_and_drop_stopwords() {
        let n = normalize("Salmon Runs", "The salmon and the river. Salmon!", &[]);
        assert_eq!(n.token_counts.get("salmon"), Some(&3));
        assert_eq!(n.token_counts.get("river"), Some(&1));
        assert_eq!(n.token_counts.get("the"), None);
        assert_eq!(n.token_counts.get("and"), None);
    }

    #[test]
    fn normalization_is_deterministic() {
        let a = normalize("A title", "Some #tagged body text", &["extra".into()]);
        let b = normalize("A title", "Some #tagged body text", &["extra".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_yields_empty_outputs() {
        let n = normalize("", "", &[]);
        assert!(n.tags.is_empty());
        assert!(n.token_counts.is_empty());
        assert_eq!(n.canonical_text, "\n\n");
    }
}
