//! SQLite storage backend
//!
//! Single database file, WAL mode, foreign keys on. Thread-safe via an
//! internal mutex on the connection; write transactions serialize
//! behind it while WAL readers proceed. Every composite operation the
//! pipelines need (link result application, document writes) commits in
//! one transaction together with its event-log appends.

use super::{StorageError, StorageResult};
use crate::config::{ForestConfig, TOKENIZER_VERSION};
use crate::events::DomainEvent;
use crate::graph::{
    Document, DocumentChunk, DocumentId, Edge, EdgeId, EdgeType, Note, NoteId, SegmentId,
    Snapshot, SnapshotId, SnapshotType,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::warn;

/// SQLite-backed store for the whole data model.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

/// All rows touched by one document pipeline transaction. Either the
/// whole write commits or none of it does.
pub struct DocumentWrite<'a> {
    pub document: &'a Document,
    /// Full replacement chunk set, already in `chunk_order`.
    pub chunks: &'a [DocumentChunk],
    pub put_notes: &'a [Note],
    pub delete_note_ids: &'a [NoteId],
    pub put_edges: &'a [Edge],
    pub delete_edge_pairs: &'a [(NoteId, NoteId)],
    pub events: &'a [DomainEvent],
}

/// Range/type filter for snapshot listings.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub snapshot_type: Option<SnapshotType>,
    pub limit: Option<usize>,
}

impl SqliteStore {
    /// Open or create a store at the given path and verify it against
    /// the configuration record.
    pub fn open(path: impl AsRef<Path>, config: &ForestConfig) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        #[cfg(feature = "embeddings")]
        super::sqlite_vec::register_vec_extension();
        let conn = Connection::open(path)?;
        Self::init(conn, config)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(config: &ForestConfig) -> StorageResult<Self> {
        #[cfg(feature = "embeddings")]
        super::sqlite_vec::register_vec_extension();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, config)
    }

    fn init(conn: Connection, config: &ForestConfig) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            dimension: config.embed_dimension,
        };
        store.verify_config_record(config)?;
        #[cfg(feature = "embeddings")]
        store.init_vec_index()?;
        Ok(store)
    }

    /// Create or rebuild the vec0 index and reconcile it with the
    /// embedding sidecar. Runs after the config record check, so a
    /// dimension change only reaches here once it is known to be legal.
    #[cfg(feature = "embeddings")]
    fn init_vec_index(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let stored_dim: Option<usize> = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'vec_dimension'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|s| s.parse().ok());
        if stored_dim != Some(self.dimension) {
            conn.execute("DROP TABLE IF EXISTS vec_index", [])?;
        }
        super::sqlite_vec::init_vec_schema(&conn, self.dimension)?;
        super::sqlite_vec::sync_vec_index(&conn)?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES ('vec_dimension', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![self.dimension.to_string()],
        )?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                token_counts_json TEXT NOT NULL,
                embedding_model TEXT,
                metadata_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at);
            CREATE INDEX IF NOT EXISTS idx_notes_title ON notes(title);

            -- Embeddings out-of-row, co-located for vector scans
            CREATE TABLE IF NOT EXISTS note_embeddings (
                note_id TEXT PRIMARY KEY REFERENCES notes(id) ON DELETE CASCADE,
                dim INTEGER NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                edge_type TEXT NOT NULL,
                semantic_score REAL NOT NULL,
                tag_score REAL NOT NULL,
                score REAL NOT NULL,
                components_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (source_id, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

            -- Derived tag index, maintained with every note write
            CREATE TABLE IF NOT EXISTS tags (
                tag TEXT NOT NULL,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                PRIMARY KEY (tag, note_id)
            );
            CREATE INDEX IF NOT EXISTS idx_tags_note ON tags(note_id);

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                root_note_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_chunks (
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                segment_id TEXT NOT NULL,
                note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                chunk_offset INTEGER NOT NULL,
                chunk_length INTEGER NOT NULL,
                chunk_order INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                PRIMARY KEY (document_id, segment_id)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_note ON document_chunks(note_id);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                taken_at TEXT NOT NULL,
                snapshot_type TEXT NOT NULL,
                node_count INTEGER NOT NULL,
                edge_count INTEGER NOT NULL,
                tag_count INTEGER NOT NULL,
                nodes_digest TEXT NOT NULL,
                edges_digest TEXT NOT NULL,
                tags_digest TEXT NOT NULL,
                event_cursor INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_taken ON snapshots(taken_at);

            -- Append-only event log; seq is the replay cursor
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                at TEXT NOT NULL,
                note_ids_json TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Check the persisted configuration record against the current
    /// config. A dimension mismatch with stored embeddings is fatal;
    /// a tokenizer version change only warns (lexical similarity is
    /// stale until an admin rescore).
    fn verify_config_record(&self, config: &ForestConfig) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();

        let stored_dim: Option<usize> = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'embed_dimension'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|s| s.parse().ok());
        let embedding_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM note_embeddings", [], |row| row.get(0))?;
        if let Some(stored) = stored_dim {
            if stored != config.embed_dimension && embedding_rows > 0 {
                return Err(StorageError::DimensionMismatch {
                    stored,
                    configured: config.embed_dimension,
                });
            }
        }
        // Belt and braces: stored vectors must agree even if the config
        // record was lost.
        let odd_dim: Option<i64> = conn
            .query_row(
                "SELECT dim FROM note_embeddings WHERE dim != ?1 LIMIT 1",
                params![config.embed_dimension as i64],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(dim) = odd_dim {
            return Err(StorageError::DimensionMismatch {
                stored: dim as usize,
                configured: config.embed_dimension,
            });
        }

        let stored_tokenizer: Option<u32> = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'tokenizer_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|s| s.parse().ok());
        if let Some(v) = stored_tokenizer {
            if v != TOKENIZER_VERSION {
                warn!(
                    stored = v,
                    current = TOKENIZER_VERSION,
                    "tokenizer version changed; run an admin rescore to refresh lexical scores"
                );
            }
        }

        for (key, value) in [
            ("embed_provider", config.embed_provider.to_string()),
            ("embed_model", config.embed_model.clone()),
            ("embed_dimension", config.embed_dimension.to_string()),
            ("tokenizer_version", TOKENIZER_VERSION.to_string()),
            (
                "score_weights",
                serde_json::to_string(&config.score_weights)?,
            ),
            ("accept_threshold", config.accept_threshold.to_string()),
            ("suggest_threshold", config.suggest_threshold.to_string()),
            ("bridge_tag_pattern", config.bridge_tag_pattern.clone()),
            (
                "auto_snapshot",
                serde_json::to_string(&config.auto_snapshot)?,
            ),
        ] {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // === Notes ===

    /// Insert or update a note (tags index, embedding sidecar, and event
    /// appends in the same transaction).
    pub fn put_note(&self, note: &Note, events: &[DomainEvent]) -> StorageResult<()> {
        if let Some(vector) = &note.embedding {
            if vector.len() != self.dimension {
                return Err(StorageError::DimensionMismatch {
                    stored: vector.len(),
                    configured: self.dimension,
                });
            }
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        write_note_row(&tx, note)?;
        for event in events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_note(&self, id: &NoteId) -> StorageResult<Option<Note>> {
        let conn = self.conn.lock().unwrap();
        read_note(&conn, id)
    }

    pub fn note_exists(&self, id: &NoteId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Delete a note. Edges, tag rows, the embedding sidecar, and chunk
    /// rows cascade. Callers collect the doomed edges first to build
    /// their events.
    pub fn delete_note(&self, id: &NoteId, events: &[DomainEvent]) -> StorageResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        #[cfg(feature = "embeddings")]
        super::sqlite_vec::delete_vector(&tx, id)?;
        let removed = tx.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
        if removed > 0 {
            for event in events {
                append_event(&tx, event)?;
            }
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn all_notes(&self) -> StorageResult<Vec<Note>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM notes ORDER BY id")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(note) = read_note(&conn, &NoteId::from_string(id))? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    pub fn all_note_ids(&self) -> StorageResult<Vec<NoteId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM notes ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(NoteId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    pub fn count_notes(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn note_ids_with_prefix(&self, prefix: &str) -> StorageResult<Vec<NoteId>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{}%", escape_like(prefix));
        let mut stmt =
            conn.prepare("SELECT id FROM notes WHERE id LIKE ?1 ESCAPE '\\' ORDER BY id")?;
        let ids = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .map(|r| r.map(NoteId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    pub fn note_ids_with_title(&self, title: &str) -> StorageResult<Vec<NoteId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id FROM notes WHERE title = ?1 COLLATE NOCASE ORDER BY id")?;
        let ids = stmt
            .query_map(params![title], |row| row.get::<_, String>(0))?
            .map(|r| r.map(NoteId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    // === Embeddings ===

    /// Every stored (note id, vector) pair. Backs the inline
    /// nearest-neighbor scan when the vec0 index is not compiled in.
    pub fn all_embeddings(&self) -> StorageResult<Vec<(NoteId, Vec<f32>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT note_id, vector FROM note_embeddings")?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((NoteId::from_string(id), bytes_to_vector(&blob)))
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Top-k stored embeddings by cosine similarity, descending, ties
    /// broken by note id. With the `embeddings` feature the vec0 index
    /// answers a KNN query; otherwise the sidecar table is scanned
    /// inline. The query must match the configured dimension.
    pub fn nearest_embeddings(
        &self,
        query: &[f32],
        k: usize,
    ) -> StorageResult<Vec<(NoteId, f32)>> {
        if k == 0 || query.len() != self.dimension {
            return Ok(Vec::new());
        }

        #[cfg(feature = "embeddings")]
        let mut scored = {
            let conn = self.conn.lock().unwrap();
            super::sqlite_vec::knn(&conn, &vector_to_bytes(query), k)?
        };

        #[cfg(not(feature = "embeddings"))]
        let mut scored: Vec<(NoteId, f32)> = self
            .all_embeddings()?
            .into_iter()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(id, v)| {
                // Unit vectors: the dot product is the cosine.
                let dot: f32 = query.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
                (id, dot)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    // === Edges ===

    pub fn upsert_edge(&self, edge: &Edge, events: &[DomainEvent]) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        write_edge_row(&tx, edge)?;
        for event in events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn edge_between(&self, a: &NoteId, b: &NoteId) -> StorageResult<Option<Edge>> {
        let (source, target) = crate::graph::canonical_pair(a.clone(), b.clone());
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE source_id = ?1 AND target_id = ?2"),
            params![source.as_str(), target.as_str()],
            row_to_edge,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_edge(&self, id: &EdgeId) -> StorageResult<Option<Edge>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1"),
            params![id.as_str()],
            row_to_edge,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn edge_ids_with_prefix(&self, prefix: &str) -> StorageResult<Vec<EdgeId>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{}%", escape_like(prefix));
        let mut stmt =
            conn.prepare("SELECT id FROM edges WHERE id LIKE ?1 ESCAPE '\\' ORDER BY id")?;
        let ids = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .map(|r| r.map(EdgeId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    pub fn edges_for(&self, id: &NoteId) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE source_id = ?1 OR target_id = ?1
             ORDER BY score DESC, source_id, target_id"
        ))?;
        let edges = stmt
            .query_map(params![id.as_str()], row_to_edge)?
            .collect::<Result<_, _>>()?;
        Ok(edges)
    }

    pub fn all_edges(&self) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges ORDER BY source_id, target_id"
        ))?;
        let edges = stmt.query_map([], row_to_edge)?.collect::<Result<_, _>>()?;
        Ok(edges)
    }

    pub fn count_edges(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Edge count per note, O(log n) over the endpoint indexes.
    pub fn degree(&self, id: &NoteId) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE source_id = ?1 OR target_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn delete_edge_between(
        &self,
        a: &NoteId,
        b: &NoteId,
        events: &[DomainEvent],
    ) -> StorageResult<bool> {
        let (source, target) = crate::graph::canonical_pair(a.clone(), b.clone());
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2",
            params![source.as_str(), target.as_str()],
        )?;
        if removed > 0 {
            for event in events {
                append_event(&tx, event)?;
            }
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Apply one linking pass's result atomically: upserts, removals,
    /// and their events in a single transaction.
    pub fn apply_link_changes(
        &self,
        upserts: &[Edge],
        removals: &[(NoteId, NoteId)],
        events: &[DomainEvent],
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for edge in upserts {
            write_edge_row(&tx, edge)?;
        }
        for (a, b) in removals {
            let (source, target) = crate::graph::canonical_pair(a.clone(), b.clone());
            tx.execute(
                "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2",
                params![source.as_str(), target.as_str()],
            )?;
        }
        for event in events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    // === Tags ===

    pub fn notes_with_any_tag(&self, tags: &[String]) -> StorageResult<Vec<NoteId>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; tags.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT note_id FROM tags WHERE tag IN ({placeholders}) ORDER BY note_id"
        ))?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(tags.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .map(|r| r.map(NoteId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    pub fn notes_with_tag(&self, tag: &str) -> StorageResult<Vec<NoteId>> {
        self.notes_with_any_tag(&[tag.to_string()])
    }

    /// All tags with their note counts, sorted by tag.
    pub fn all_tags(&self) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT tag, COUNT(*) FROM tags GROUP BY tag ORDER BY tag")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn count_tags(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(DISTINCT tag) FROM tags", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // === Documents ===

    pub fn get_document(&self, id: &DocumentId) -> StorageResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, body, metadata_json, version, root_note_id, created_at, updated_at
             FROM documents WHERE id = ?1",
            params![id.as_str()],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn all_documents(&self) -> StorageResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, body, metadata_json, version, root_note_id, created_at, updated_at
             FROM documents ORDER BY id",
        )?;
        let docs = stmt
            .query_map([], row_to_document)?
            .collect::<Result<_, _>>()?;
        Ok(docs)
    }

    /// Chunk rows for a document, ordered by `chunk_order`.
    pub fn chunks_for(&self, id: &DocumentId) -> StorageResult<Vec<DocumentChunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT document_id, segment_id, note_id, chunk_offset, chunk_length, chunk_order, checksum
             FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_order",
        )?;
        let chunks = stmt
            .query_map(params![id.as_str()], row_to_chunk)?
            .collect::<Result<_, _>>()?;
        Ok(chunks)
    }

    pub fn chunk_for_note(&self, id: &NoteId) -> StorageResult<Option<DocumentChunk>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT document_id, segment_id, note_id, chunk_offset, chunk_length, chunk_order, checksum
             FROM document_chunks WHERE note_id = ?1",
            params![id.as_str()],
            row_to_chunk,
        )
        .optional()
        .map_err(Into::into)
    }

    /// The document whose root note is `id`, if any.
    pub fn document_with_root(&self, id: &NoteId) -> StorageResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, body, metadata_json, version, root_note_id, created_at, updated_at
             FROM documents WHERE root_note_id = ?1",
            params![id.as_str()],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Note ids flagged as chunks but lacking a chunk row — legacy data
    /// the backfill scan repairs.
    pub fn orphan_chunk_note_ids(&self) -> StorageResult<Vec<NoteId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT n.id FROM notes n
             LEFT JOIN document_chunks c ON c.note_id = n.id
             WHERE c.note_id IS NULL
               AND json_extract(n.metadata_json, '$.is_chunk') = 1
             ORDER BY n.id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(NoteId::from_string))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// Commit a full document pipeline mutation in one transaction.
    pub fn apply_document_write(&self, write: DocumentWrite<'_>) -> StorageResult<()> {
        for note in write.put_notes {
            if let Some(vector) = &note.embedding {
                if vector.len() != self.dimension {
                    return Err(StorageError::DimensionMismatch {
                        stored: vector.len(),
                        configured: self.dimension,
                    });
                }
            }
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        write_document_row(&tx, write.document)?;
        for note in write.put_notes {
            write_note_row(&tx, note)?;
        }
        tx.execute(
            "DELETE FROM document_chunks WHERE document_id = ?1",
            params![write.document.id.as_str()],
        )?;
        for chunk in write.chunks {
            write_chunk_row(&tx, chunk)?;
        }
        for id in write.delete_note_ids {
            #[cfg(feature = "embeddings")]
            super::sqlite_vec::delete_vector(&tx, id)?;
            tx.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
        }
        for edge in write.put_edges {
            write_edge_row(&tx, edge)?;
        }
        for (a, b) in write.delete_edge_pairs {
            let (source, target) = crate::graph::canonical_pair(a.clone(), b.clone());
            tx.execute(
                "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2",
                params![source.as_str(), target.as_str()],
            )?;
        }
        for event in write.events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a document record together with the given notes (its
    /// chunks and root). Chunk rows cascade from the document.
    pub fn delete_document(
        &self,
        id: &DocumentId,
        note_ids: &[NoteId],
        events: &[DomainEvent],
    ) -> StorageResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])?;
        for note_id in note_ids {
            #[cfg(feature = "embeddings")]
            super::sqlite_vec::delete_vector(&tx, note_id)?;
            tx.execute("DELETE FROM notes WHERE id = ?1", params![note_id.as_str()])?;
        }
        for event in events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    // === Snapshots ===

    pub fn put_snapshot(&self, snapshot: &Snapshot, events: &[DomainEvent]) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (id, taken_at, snapshot_type, node_count, edge_count,
                                    tag_count, nodes_digest, edges_digest, tags_digest, event_cursor)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                snapshot.id.as_str(),
                snapshot.taken_at.to_rfc3339(),
                snapshot.snapshot_type.to_string(),
                snapshot.node_count as i64,
                snapshot.edge_count as i64,
                snapshot.tag_count as i64,
                snapshot.nodes_digest,
                snapshot.edges_digest,
                snapshot.tags_digest,
                snapshot.event_cursor as i64,
            ],
        )?;
        for event in events {
            append_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> StorageResult<Vec<Snapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, taken_at, snapshot_type, node_count, edge_count, tag_count,
                    nodes_digest, edges_digest, tags_digest, event_cursor
             FROM snapshots WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(since) = filter.since {
            args.push(since.to_rfc3339());
            sql.push_str(&format!(" AND taken_at >= ?{}", args.len()));
        }
        if let Some(until) = filter.until {
            args.push(until.to_rfc3339());
            sql.push_str(&format!(" AND taken_at <= ?{}", args.len()));
        }
        if let Some(t) = filter.snapshot_type {
            args.push(t.to_string());
            sql.push_str(&format!(" AND snapshot_type = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY taken_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_snapshot)?
            .collect::<Result<_, _>>()?;
        Ok(snapshots)
    }

    pub fn latest_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        Ok(self
            .list_snapshots(&SnapshotFilter {
                limit: Some(1),
                ..Default::default()
            })?
            .into_iter()
            .next())
    }

    pub fn latest_snapshot_at_or_before(
        &self,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<Snapshot>> {
        Ok(self
            .list_snapshots(&SnapshotFilter {
                until: Some(at),
                limit: Some(1),
                ..Default::default()
            })?
            .into_iter()
            .next())
    }

    /// Retention sweep: drop auto snapshots taken before the cutoff.
    pub fn delete_auto_snapshots_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM snapshots WHERE snapshot_type = 'auto' AND taken_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed as u64)
    }

    // === Events ===

    /// Highest assigned event sequence number (0 when the log is empty).
    pub fn event_cursor(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) as u64)
    }

    /// Events with `seq > cursor`, in commit order.
    pub fn events_after(&self, cursor: u64) -> StorageResult<Vec<DomainEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, kind, at, note_ids_json, tags_json, payload_json
             FROM events WHERE seq > ?1 ORDER BY seq",
        )?;
        let events = stmt
            .query_map(params![cursor as i64], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        events.into_iter().collect()
    }

    /// Graph mutation events (node.* / edge.*) since the cursor; drives
    /// the auto-snapshot mutation threshold.
    pub fn count_mutations_after(&self, cursor: u64) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE seq > ?1 AND kind != 'snapshot.taken'",
            params![cursor as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// --- row mapping helpers -------------------------------------------------

const EDGE_COLUMNS: &str = "id, source_id, target_id, edge_type, semantic_score, tag_score, \
                            score, components_json, created_at, updated_at";

fn write_note_row(conn: &Connection, note: &Note) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO notes (id, title, body, tags_json, token_counts_json, embedding_model,
                            metadata_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            tags_json = excluded.tags_json,
            token_counts_json = excluded.token_counts_json,
            embedding_model = excluded.embedding_model,
            metadata_json = excluded.metadata_json,
            updated_at = excluded.updated_at",
        params![
            note.id.as_str(),
            note.title,
            note.body,
            serde_json::to_string(&note.tags)?,
            serde_json::to_string(&note.token_counts)?,
            note.embedding_model,
            serde_json::to_string(&note.metadata)?,
            note.created_at.to_rfc3339(),
            note.updated_at.to_rfc3339(),
        ],
    )?;

    // Tag index rows replaced wholesale with the note write.
    conn.execute(
        "DELETE FROM tags WHERE note_id = ?1",
        params![note.id.as_str()],
    )?;
    for tag in &note.tags {
        conn.execute(
            "INSERT OR IGNORE INTO tags (tag, note_id) VALUES (?1, ?2)",
            params![tag, note.id.as_str()],
        )?;
    }

    match &note.embedding {
        Some(vector) => {
            let bytes = vector_to_bytes(vector);
            conn.execute(
                "INSERT INTO note_embeddings (note_id, dim, vector) VALUES (?1, ?2, ?3)
                 ON CONFLICT(note_id) DO UPDATE SET dim = excluded.dim, vector = excluded.vector",
                params![note.id.as_str(), vector.len() as i64, bytes],
            )?;
            #[cfg(feature = "embeddings")]
            super::sqlite_vec::upsert_vector(conn, &note.id, &bytes)?;
        }
        None => {
            conn.execute(
                "DELETE FROM note_embeddings WHERE note_id = ?1",
                params![note.id.as_str()],
            )?;
            #[cfg(feature = "embeddings")]
            super::sqlite_vec::delete_vector(conn, &note.id)?;
        }
    }
    Ok(())
}

fn read_note(conn: &Connection, id: &NoteId) -> StorageResult<Option<Note>> {
    let row = conn
        .query_row(
            "SELECT id, title, body, tags_json, token_counts_json, embedding_model,
                    metadata_json, created_at, updated_at
             FROM notes WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;
    let Some((id, title, body, tags_json, counts_json, embedding_model, metadata_json, created, updated)) =
        row
    else {
        return Ok(None);
    };

    let embedding: Option<Vec<f32>> = conn
        .query_row(
            "SELECT vector FROM note_embeddings WHERE note_id = ?1",
            params![&id],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .map(|blob| bytes_to_vector(&blob));

    Ok(Some(Note {
        id: NoteId::from_string(id),
        title,
        body,
        tags: serde_json::from_str(&tags_json)?,
        token_counts: serde_json::from_str(&counts_json)?,
        embedding,
        embedding_model,
        metadata: serde_json::from_str(&metadata_json)?,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    }))
}

fn write_edge_row(conn: &Connection, edge: &Edge) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO edges (id, source_id, target_id, edge_type, semantic_score, tag_score,
                            score, components_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(source_id, target_id) DO UPDATE SET
            edge_type = excluded.edge_type,
            semantic_score = excluded.semantic_score,
            tag_score = excluded.tag_score,
            score = excluded.score,
            components_json = excluded.components_json,
            updated_at = excluded.updated_at",
        params![
            edge.id.as_str(),
            edge.source_id.as_str(),
            edge.target_id.as_str(),
            edge.edge_type.to_string(),
            edge.semantic_score,
            edge.tag_score,
            edge.score,
            serde_json::to_string(&edge.components)?,
            edge.created_at.to_rfc3339(),
            edge.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let edge_type: String = row.get(3)?;
    let components_json: String = row.get(7)?;
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;
    Ok(Edge {
        id: EdgeId::from_string(row.get::<_, String>(0)?),
        source_id: NoteId::from_string(row.get::<_, String>(1)?),
        target_id: NoteId::from_string(row.get::<_, String>(2)?),
        edge_type: EdgeType::from_str(&edge_type).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        semantic_score: row.get(4)?,
        tag_score: row.get(5)?,
        score: row.get(6)?,
        components: serde_json::from_str(&components_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        created_at: parse_timestamp_sql(&created, 8)?,
        updated_at: parse_timestamp_sql(&updated, 9)?,
    })
}

fn write_document_row(conn: &Connection, document: &Document) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO documents (id, title, body, metadata_json, version, root_note_id,
                                created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            version = excluded.version,
            root_note_id = excluded.root_note_id,
            updated_at = excluded.updated_at",
        params![
            document.id.as_str(),
            document.title,
            document.body,
            serde_json::to_string(&document.metadata)?,
            document.version as i64,
            document.root_note_id.as_ref().map(|id| id.as_str()),
            document.created_at.to_rfc3339(),
            document.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get(3)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    Ok(Document {
        id: DocumentId::from_string(row.get::<_, String>(0)?),
        title: row.get(1)?,
        body: row.get(2)?,
        metadata: serde_json::from_str(&metadata_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        version: row.get::<_, i64>(4)? as u64,
        root_note_id: row
            .get::<_, Option<String>>(5)?
            .map(NoteId::from_string),
        created_at: parse_timestamp_sql(&created, 6)?,
        updated_at: parse_timestamp_sql(&updated, 7)?,
    })
}

fn write_chunk_row(conn: &Connection, chunk: &DocumentChunk) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO document_chunks (document_id, segment_id, note_id, chunk_offset,
                                      chunk_length, chunk_order, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(document_id, segment_id) DO UPDATE SET
            note_id = excluded.note_id,
            chunk_offset = excluded.chunk_offset,
            chunk_length = excluded.chunk_length,
            chunk_order = excluded.chunk_order,
            checksum = excluded.checksum",
        params![
            chunk.document_id.as_str(),
            chunk.segment_id.as_str(),
            chunk.note_id.as_str(),
            chunk.offset as i64,
            chunk.length as i64,
            chunk.chunk_order as i64,
            chunk.checksum,
        ],
    )?;
    Ok(())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentChunk> {
    Ok(DocumentChunk {
        document_id: DocumentId::from_string(row.get::<_, String>(0)?),
        segment_id: SegmentId::from_string(row.get::<_, String>(1)?),
        note_id: NoteId::from_string(row.get::<_, String>(2)?),
        offset: row.get::<_, i64>(3)? as usize,
        length: row.get::<_, i64>(4)? as usize,
        chunk_order: row.get::<_, i64>(5)? as u32,
        checksum: row.get(6)?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let taken: String = row.get(1)?;
    let snapshot_type: String = row.get(2)?;
    Ok(Snapshot {
        id: SnapshotId::from_string(row.get::<_, String>(0)?),
        taken_at: parse_timestamp_sql(&taken, 1)?,
        snapshot_type: SnapshotType::from_str(&snapshot_type).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        node_count: row.get::<_, i64>(3)? as u64,
        edge_count: row.get::<_, i64>(4)? as u64,
        tag_count: row.get::<_, i64>(5)? as u64,
        nodes_digest: row.get(6)?,
        edges_digest: row.get(7)?,
        tags_digest: row.get(8)?,
        event_cursor: row.get::<_, i64>(9)? as u64,
    })
}

fn append_event(conn: &Connection, event: &DomainEvent) -> StorageResult<u64> {
    conn.execute(
        "INSERT INTO events (kind, at, note_ids_json, tags_json, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.kind.as_str(),
            event.at.to_rfc3339(),
            serde_json::to_string(&event.note_ids)?,
            serde_json::to_string(&event.tags)?,
            serde_json::to_string(&event.payload)?,
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorageResult<DomainEvent>> {
    let seq: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let at: String = row.get(2)?;
    let note_ids_json: String = row.get(3)?;
    let tags_json: String = row.get(4)?;
    let payload_json: String = row.get(5)?;
    Ok((|| {
        Ok(DomainEvent {
            seq: seq as u64,
            kind: kind.parse().map_err(StorageError::InvalidData)?,
            at: parse_timestamp(&at)?,
            note_ids: serde_json::from_str(&note_ids_json)?,
            tags: serde_json::from_str(&tags_json)?,
            payload: serde_json::from_str(&payload_json)?,
        })
    })())
}

/// Escape LIKE wildcards so user-supplied prefixes match literally.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(format!("{s}: {e}")))
}

fn parse_timestamp_sql(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;
    use crate::events::{DomainEvent, EventKind};
    use crate::graph::{Edge, EdgeType, Note};
    use crate::ingest::normalize;

    fn test_config(dim: usize) -> ForestConfig {
        ForestConfig {
            embed_dimension: dim,
            ..Default::default()
        }
    }

    fn ingested(title: &str, body: &str) -> Note {
        let n = normalize(title, body, &[]);
        let mut note = Note::new(title, body);
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        note
    }

    #[test]
    fn note_round_trips_with_embedding() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let note = ingested("Salmon", "River fish #ecology").with_embedding(
            vec![1.0, 0.0, 0.0],
            "mock:deterministic",
        );
        store.put_note(&note, &[]).unwrap();
        let loaded = store.get_note(&note.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Salmon");
        assert_eq!(loaded.tags, vec!["ecology"]);
        assert_eq!(loaded.embedding, Some(vec![1.0, 0.0, 0.0]));
        assert_eq!(loaded.embedding_model.as_deref(), Some("mock:deterministic"));
    }

    #[test]
    fn rejects_wrong_dimension() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let note = ingested("x", "y").with_embedding(vec![1.0, 0.0], "mock");
        let err = store.put_note(&note, &[]).unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { .. }));
    }

    #[test]
    fn tag_index_follows_note_writes() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let mut note = ingested("t", "#alpha #beta");
        store.put_note(&note, &[]).unwrap();
        assert_eq!(store.notes_with_tag("alpha").unwrap(), vec![note.id.clone()]);

        let n = normalize("t", "#beta only now", &[]);
        note.body = "#beta only now".to_string();
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        store.put_note(&note, &[]).unwrap();
        assert!(store.notes_with_tag("alpha").unwrap().is_empty());
        assert_eq!(store.notes_with_tag("beta").unwrap(), vec![note.id]);
    }

    #[test]
    fn deleting_note_cascades_edges_and_tags() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let a = ingested("a", "#shared");
        let b = ingested("b", "#shared");
        store.put_note(&a, &[]).unwrap();
        store.put_note(&b, &[]).unwrap();
        let edge = Edge::new(a.id.clone(), b.id.clone(), EdgeType::Semantic);
        store.upsert_edge(&edge, &[]).unwrap();
        assert_eq!(store.count_edges().unwrap(), 1);

        store.delete_note(&a.id, &[]).unwrap();
        assert_eq!(store.count_edges().unwrap(), 0);
        assert_eq!(store.notes_with_tag("shared").unwrap(), vec![b.id]);
    }

    #[test]
    fn one_edge_per_unordered_pair() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let a = ingested("a", "x");
        let b = ingested("b", "y");
        store.put_note(&a, &[]).unwrap();
        store.put_note(&b, &[]).unwrap();
        let e1 = Edge::new(a.id.clone(), b.id.clone(), EdgeType::Semantic);
        let e2 = Edge::new(b.id.clone(), a.id.clone(), EdgeType::Manual);
        store.upsert_edge(&e1, &[]).unwrap();
        store.upsert_edge(&e2, &[]).unwrap();
        assert_eq!(store.count_edges().unwrap(), 1);
        let stored = store.edge_between(&a.id, &b.id).unwrap().unwrap();
        assert_eq!(stored.edge_type, EdgeType::Manual);
    }

    #[test]
    fn degree_counts_both_endpoints() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let a = ingested("a", "x");
        let b = ingested("b", "y");
        let c = ingested("c", "z");
        for n in [&a, &b, &c] {
            store.put_note(n, &[]).unwrap();
        }
        store
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::Semantic), &[])
            .unwrap();
        store
            .upsert_edge(&Edge::new(c.id.clone(), a.id.clone(), EdgeType::Semantic), &[])
            .unwrap();
        assert_eq!(store.degree(&a.id).unwrap(), 2);
        assert_eq!(store.degree(&b.id).unwrap(), 1);
    }

    #[test]
    fn nearest_embeddings_ranks_by_cosine() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let exact = ingested("exact", "x").with_embedding(vec![1.0, 0.0, 0.0], "mock");
        let near = ingested("near", "y").with_embedding(vec![0.6, 0.8, 0.0], "mock");
        let far = ingested("far", "z").with_embedding(vec![0.0, 0.0, 1.0], "mock");
        for n in [&exact, &near, &far] {
            store.put_note(n, &[]).unwrap();
        }

        let hits = store.nearest_embeddings(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, exact.id);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].0, near.id);
        assert!((hits[1].1 - 0.6).abs() < 1e-5);
    }

    #[test]
    fn nearest_embeddings_forgets_deleted_and_cleared_notes() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let deleted = ingested("deleted", "x").with_embedding(vec![1.0, 0.0, 0.0], "mock");
        let mut cleared = ingested("cleared", "y").with_embedding(vec![0.9, 0.1, 0.0], "mock");
        let kept = ingested("kept", "z").with_embedding(vec![0.0, 1.0, 0.0], "mock");
        for n in [&deleted, &cleared, &kept] {
            store.put_note(n, &[]).unwrap();
        }

        store.delete_note(&deleted.id, &[]).unwrap();
        cleared.clear_embedding();
        store.put_note(&cleared, &[]).unwrap();

        let hits = store.nearest_embeddings(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, kept.id);
    }

    #[test]
    fn nearest_embeddings_rejects_foreign_dimension() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let note = ingested("a", "x").with_embedding(vec![1.0, 0.0, 0.0], "mock");
        store.put_note(&note, &[]).unwrap();
        assert!(store.nearest_embeddings(&[1.0, 0.0], 5).unwrap().is_empty());
        assert!(store.nearest_embeddings(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn events_append_in_commit_order() {
        let store = SqliteStore::open_in_memory(&test_config(3)).unwrap();
        let note = ingested("a", "x");
        store
            .put_note(
                &note,
                &[DomainEvent::new(
                    EventKind::NodeCreated,
                    vec![note.id.clone()],
                    vec![],
                )],
            )
            .unwrap();
        store
            .put_note(
                &note,
                &[DomainEvent::new(
                    EventKind::NodeUpdated,
                    vec![note.id.clone()],
                    vec![],
                )],
            )
            .unwrap();
        let events = store.events_after(0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::NodeCreated);
        assert_eq!(events[1].kind, EventKind::NodeUpdated);
        assert!(events[0].seq < events[1].seq);
    }

    #[test]
    fn dimension_change_with_stored_embeddings_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.db");
        {
            let store = SqliteStore::open(&path, &test_config(3)).unwrap();
            let note = ingested("a", "x").with_embedding(vec![1.0, 0.0, 0.0], "mock");
            store.put_note(&note, &[]).unwrap();
        }
        let err = SqliteStore::open(&path, &test_config(4)).unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { .. }));
    }

    #[test]
    fn dimension_change_without_embeddings_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.db");
        {
            let store = SqliteStore::open(&path, &test_config(3)).unwrap();
            store.put_note(&ingested("a", "x"), &[]).unwrap();
        }
        SqliteStore::open(&path, &test_config(4)).unwrap();
    }

    #[test]
    fn vector_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&v)), v);

        use rand::Rng;
        let mut rng = rand::thread_rng();
        let random: Vec<f32> = (0..768).map(|_| rng.gen_range(-1.0..1.0)).collect();
        assert_eq!(bytes_to_vector(&vector_to_bytes(&random)), random);
    }
}
