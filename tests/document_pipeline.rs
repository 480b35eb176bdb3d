//! End-to-end scenarios for the document pipeline

mod common;

use common::engine;
use forest::{ChunkStrategy, EdgeType, ImportOptions, SegmentEdit};

const BODY: &str = "# Estuaries\n\nWhere rivers meet the sea.\n\n# Watersheds\n\nDrainage basins and divides.\n\n# Riparian zones\n\nBanks and floodplains.";

#[tokio::test]
async fn document_import() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.chunk_note_ids.len(), 3);
    let root_id = outcome.root_note_id.clone().expect("root note");

    // Chunk order 0,1,2 and titles carrying position + heading.
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    assert_eq!(
        chunks.iter().map(|c| c.chunk_order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    let first = t.engine.get_note(chunks[0].note_id.as_str()).unwrap();
    assert_eq!(first.title, "River systems [1/3] Estuaries");
    assert!(first.metadata.is_chunk);
    assert_eq!(
        first.metadata.parent_document_id.as_ref(),
        Some(&outcome.document_id)
    );

    // Structural edges: 3 parent + 2 sequential.
    let mut parent = 0;
    let mut sequential = 0;
    for id in &outcome.chunk_note_ids {
        for edge in t.engine.edges_for(id.as_str()).unwrap() {
            match edge.edge_type {
                EdgeType::StructuralParent => parent += 1,
                EdgeType::StructuralSequential => sequential += 1,
                _ => {}
            }
        }
    }
    assert_eq!(parent, 3, "each chunk linked to the root");
    assert_eq!(sequential, 2 * 2, "each sequential edge seen from both ends");
    assert_eq!(t.engine.degree(root_id.as_str()).unwrap(), 3);

    // Canonical body reads back byte-for-byte.
    let document = t.engine.get_document(&outcome.document_id).unwrap();
    assert_eq!(document.body, BODY);
    for chunk in &chunks {
        let note = t.engine.get_note(chunk.note_id.as_str()).unwrap();
        assert_eq!(
            &document.body[chunk.offset..chunk.offset + chunk.length],
            note.body
        );
    }
}

#[tokio::test]
async fn segment_edit_bumps_version_once() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    let untouched = t.engine.get_note(chunks[1].note_id.as_str()).unwrap();
    let before_version = t.engine.get_document(&outcome.document_id).unwrap().version;

    let edit = t
        .engine
        .edit_segments(
            &outcome.document_id,
            &[
                SegmentEdit {
                    segment_id: chunks[0].segment_id.clone(),
                    new_content: "# Estuaries\n\nRewritten estuary text.".to_string(),
                },
                SegmentEdit {
                    segment_id: chunks[2].segment_id.clone(),
                    new_content: "# Riparian zones\n\nRewritten riparian text.".to_string(),
                },
            ],
        )
        .await
        .unwrap();

    // Version bumped exactly once for the two-segment save.
    let document = t.engine.get_document(&outcome.document_id).unwrap();
    assert_eq!(document.version, before_version + 1);
    assert_eq!(edit.changed_note_ids.len(), 2);

    // Chunk 1 untouched: same body, same checksum, same updated_at.
    let after = t.engine.get_note(chunks[1].note_id.as_str()).unwrap();
    assert_eq!(after.body, untouched.body);
    assert_eq!(after.updated_at, untouched.updated_at);
    let new_chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    assert_eq!(new_chunks[1].checksum, chunks[1].checksum);
    assert_ne!(new_chunks[0].checksum, chunks[0].checksum);
    assert_ne!(new_chunks[2].checksum, chunks[2].checksum);

    // Canonical body reflects the rewrites and the offsets still agree.
    for chunk in &new_chunks {
        let note = t.engine.get_note(chunk.note_id.as_str()).unwrap();
        assert_eq!(
            &document.body[chunk.offset..chunk.offset + chunk.length],
            note.body
        );
    }
}

#[tokio::test]
async fn unchanged_edit_is_a_no_op() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    let before = t.engine.get_document(&outcome.document_id).unwrap().version;

    let note = t.engine.get_note(chunks[0].note_id.as_str()).unwrap();
    t.engine
        .edit_segments(
            &outcome.document_id,
            &[SegmentEdit {
                segment_id: chunks[0].segment_id.clone(),
                new_content: note.body,
            }],
        )
        .await
        .unwrap();
    assert_eq!(
        t.engine.get_document(&outcome.document_id).unwrap().version,
        before
    );
}

#[tokio::test]
async fn delete_chunk_compacts_and_stitches() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    let middle_note = chunks[1].note_id.clone();

    t.engine
        .delete_chunk(&outcome.document_id, &chunks[1].segment_id)
        .unwrap();

    let remaining = t.engine.document_chunks(&outcome.document_id).unwrap();
    assert_eq!(
        remaining.iter().map(|c| c.chunk_order).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(t.engine.get_note(middle_note.as_str()).is_err());

    // The surviving neighbors are stitched sequentially.
    let first_edges = t
        .engine
        .edges_for(remaining[0].note_id.as_str())
        .unwrap();
    assert!(first_edges.iter().any(|e| {
        e.edge_type == EdgeType::StructuralSequential && e.touches(&remaining[1].note_id)
    }));

    // Version bumped, canonical body reflows.
    let document = t.engine.get_document(&outcome.document_id).unwrap();
    assert_eq!(document.version, 2);
    assert!(!document.body.contains("Drainage"));
}

#[tokio::test]
async fn deleting_last_chunk_removes_document_and_root() {
    let t = engine();
    let outcome = t
        .engine
        .import_document(
            "Single",
            "only one section here",
            ImportOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.chunk_note_ids.len(), 1);
    let root = outcome.root_note_id.clone().unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();

    t.engine
        .delete_chunk(&outcome.document_id, &chunks[0].segment_id)
        .unwrap();

    assert!(t.engine.get_document(&outcome.document_id).is_err());
    assert!(t.engine.get_note(root.as_str()).is_err());
}

#[tokio::test]
async fn reorder_swaps_rows_but_not_bodies() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();

    let new_order = vec![
        chunks[2].segment_id.clone(),
        chunks[0].segment_id.clone(),
        chunks[1].segment_id.clone(),
    ];
    t.engine
        .reorder_document(&outcome.document_id, &new_order)
        .unwrap();

    let reordered = t.engine.document_chunks(&outcome.document_id).unwrap();
    assert_eq!(reordered[0].segment_id, chunks[2].segment_id);
    assert_eq!(
        reordered.iter().map(|c| c.chunk_order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    let document = t.engine.get_document(&outcome.document_id).unwrap();
    assert!(document.body.starts_with("# Riparian zones"));
    assert_eq!(document.version, 2);
}

#[tokio::test]
async fn size_overlap_offsets_partition_canonical_body() {
    let t = engine();
    let body = "one paragraph of text\n\nanother paragraph here\n\na third paragraph\n\nand a fourth one";
    let outcome = t
        .engine
        .import_document(
            "Windowed",
            body,
            ImportOptions {
                chunk_strategy: ChunkStrategy::SizeOverlap {
                    size: 48,
                    overlap: 0,
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.chunk_note_ids.len() >= 2);

    let document = t.engine.get_document(&outcome.document_id).unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    for chunk in &chunks {
        let note = t.engine.get_note(chunk.note_id.as_str()).unwrap();
        assert_eq!(
            &document.body[chunk.offset..chunk.offset + chunk.length],
            note.body
        );
    }
}

#[tokio::test]
async fn direct_chunk_edit_reenters_pipeline() {
    let t = engine();
    let outcome = t
        .engine
        .import_document("River systems", BODY, ImportOptions::default())
        .await
        .unwrap();
    let chunks = t.engine.document_chunks(&outcome.document_id).unwrap();

    t.engine
        .update_note(
            chunks[0].note_id.as_str(),
            forest::NotePatch {
                body: Some("# Estuaries\n\nEdited directly through the note path.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let document = t.engine.get_document(&outcome.document_id).unwrap();
    assert_eq!(document.version, 2, "direct chunk edit bumps version");
    assert!(document.body.contains("Edited directly"));
    // Offsets were rebuilt around the new body.
    let new_chunks = t.engine.document_chunks(&outcome.document_id).unwrap();
    for chunk in &new_chunks {
        let note = t.engine.get_note(chunk.note_id.as_str()).unwrap();
        assert_eq!(
            &document.body[chunk.offset..chunk.offset + chunk.length],
            note.body
        );
    }
}
