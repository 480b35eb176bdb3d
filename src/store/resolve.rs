//! User-supplied identifier resolution
//!
//! A note reference may be a full id, a unique id prefix, an exact
//! title, or an ordinal like `@0` against the caller's most recent
//! listing. An edge reference is `source::target` (order-insensitive)
//! or a unique edge-id prefix.

use super::{SqliteStore, StorageError, StorageResult};
use crate::graph::{Edge, NoteId};

/// Resolve a note reference to a concrete id.
pub fn resolve_note_ref(
    store: &SqliteStore,
    listing: &[NoteId],
    input: &str,
) -> StorageResult<NoteId> {
    let input = input.trim();
    if input.is_empty() {
        return Err(StorageError::NoteNotFound("(empty reference)".to_string()));
    }

    // Ordinal against the most recent listing.
    if let Some(ordinal) = input.strip_prefix('@') {
        let index: usize = ordinal
            .parse()
            .map_err(|_| StorageError::NoteNotFound(input.to_string()))?;
        return listing
            .get(index)
            .cloned()
            .ok_or_else(|| StorageError::NoteNotFound(input.to_string()));
    }

    // Full id.
    let as_id = NoteId::from_string(input);
    if store.note_exists(&as_id)? {
        return Ok(as_id);
    }

    // Unique id prefix.
    let prefixed = store.note_ids_with_prefix(input)?;
    match prefixed.len() {
        1 => return Ok(prefixed.into_iter().next().unwrap()),
        n if n > 1 => {
            return Err(StorageError::Ambiguous {
                input: input.to_string(),
                candidates: prefixed.iter().map(|id| id.to_string()).collect(),
            })
        }
        _ => {}
    }

    // Exact title.
    let titled = store.note_ids_with_title(input)?;
    match titled.len() {
        0 => Err(StorageError::NoteNotFound(input.to_string())),
        1 => Ok(titled.into_iter().next().unwrap()),
        _ => Err(StorageError::Ambiguous {
            input: input.to_string(),
            candidates: titled.iter().map(|id| id.to_string()).collect(),
        }),
    }
}

/// Split an edge reference of the form `a::b`.
pub fn parse_edge_ref(input: &str) -> Option<(&str, &str)> {
    input.split_once("::").map(|(a, b)| (a.trim(), b.trim()))
}

/// Resolve an edge reference: `source::target` endpoint pair (either
/// order), or a unique edge-id prefix.
pub fn resolve_edge_ref(
    store: &SqliteStore,
    listing: &[NoteId],
    input: &str,
) -> StorageResult<Edge> {
    if let Some((left, right)) = parse_edge_ref(input) {
        let a = resolve_note_ref(store, listing, left)?;
        let b = resolve_note_ref(store, listing, right)?;
        return store
            .edge_between(&a, &b)?
            .ok_or_else(|| StorageError::EdgeNotFound(input.to_string()));
    }

    let matches = store.edge_ids_with_prefix(input.trim())?;
    match matches.len() {
        0 => Err(StorageError::EdgeNotFound(input.to_string())),
        1 => store
            .get_edge(&matches[0])?
            .ok_or_else(|| StorageError::EdgeNotFound(input.to_string())),
        _ => Err(StorageError::Ambiguous {
            input: input.to_string(),
            candidates: matches.iter().map(|id| id.to_string()).collect(),
        }),
    }
}
