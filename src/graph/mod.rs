//! Persistent data model: notes, edges, documents, chunks, snapshots

mod document;
mod edge;
mod note;
mod snapshot;

pub use document::{
    chunk_checksum, ChunkStrategy, Document, DocumentChunk, DocumentId, DocumentMetadata,
    SegmentId, CHUNK_SEPARATOR,
};
pub use edge::{canonical_pair, Edge, EdgeId, EdgeType, ScoreComponents};
pub use note::{CreatedBy, Note, NoteId, NoteMetadata, Origin};
pub use snapshot::{Snapshot, SnapshotId, SnapshotType};
