//! KNN vector index backed by sqlite-vec
//!
//! A vec0 virtual table answers nearest-neighbor queries for the
//! linker's candidate set and semantic search. The table lives in the
//! main database so index maintenance commits inside the same
//! transaction as the note write it mirrors.
//!
//! Stored vectors are unit-norm (the embedding adapter guarantees it),
//! so L2 distance from vec0 converts to cosine similarity:
//! `sim = 1 - dist² / 2`.

use super::StorageResult;
use crate::graph::NoteId;
use rusqlite::{params, Connection};
use sqlite_vec::sqlite3_vec_init;

/// Register the sqlite-vec extension globally (safe under parallel test
/// execution). Must run before the connection is opened.
pub(super) fn register_vec_extension() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Create the vec0 virtual table sized to the configured dimension.
pub(super) fn init_vec_schema(conn: &Connection, dimension: usize) -> StorageResult<()> {
    let create_sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_index USING vec0(\
             note_id TEXT,\
             embedding float[{}]\
         )",
        dimension
    );
    conn.execute_batch(&create_sql)?;
    Ok(())
}

/// Reconcile the index with the embedding sidecar: vectors written
/// while this build lacked the index are inserted, rows for deleted
/// notes dropped. Idempotent.
pub(super) fn sync_vec_index(conn: &Connection) -> StorageResult<()> {
    conn.execute(
        "DELETE FROM vec_index
         WHERE note_id NOT IN (SELECT note_id FROM note_embeddings)",
        [],
    )?;
    let mut stmt = conn.prepare(
        "SELECT note_id, vector FROM note_embeddings
         WHERE note_id NOT IN (SELECT note_id FROM vec_index)",
    )?;
    let missing: Vec<(String, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);
    for (note_id, blob) in missing {
        conn.execute(
            "INSERT INTO vec_index (note_id, embedding) VALUES (?1, ?2)",
            params![note_id, blob],
        )?;
    }
    Ok(())
}

/// Replace a note's index row. vec0 has no conflict targets, so the
/// upsert is delete-then-insert.
pub(super) fn upsert_vector(
    conn: &Connection,
    note_id: &NoteId,
    vector_bytes: &[u8],
) -> StorageResult<()> {
    delete_vector(conn, note_id)?;
    conn.execute(
        "INSERT INTO vec_index (note_id, embedding) VALUES (?1, ?2)",
        params![note_id.as_str(), vector_bytes],
    )?;
    Ok(())
}

pub(super) fn delete_vector(conn: &Connection, note_id: &NoteId) -> StorageResult<()> {
    conn.execute(
        "DELETE FROM vec_index WHERE note_id = ?1",
        params![note_id.as_str()],
    )?;
    Ok(())
}

/// KNN query using L2 distance on normalized vectors.
/// For unit vectors: L2_dist² = 2(1 - cos_sim), so cos_sim = 1 - dist²/2.
pub(super) fn knn(
    conn: &Connection,
    query_bytes: &[u8],
    k: usize,
) -> StorageResult<Vec<(NoteId, f32)>> {
    let mut stmt = conn.prepare(
        "SELECT note_id, distance \
         FROM vec_index \
         WHERE embedding MATCH ?1 \
           AND k = ?2 \
         ORDER BY distance",
    )?;
    let hits = stmt
        .query_map(params![query_bytes, k as i64], |row| {
            let note_id: String = row.get(0)?;
            let distance: f32 = row.get(1)?;
            let similarity = 1.0 - (distance * distance) / 2.0;
            Ok((NoteId::from_string(note_id), similarity))
        })?
        .collect::<Result<_, _>>()?;
    Ok(hits)
}
