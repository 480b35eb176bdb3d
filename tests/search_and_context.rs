//! End-to-end scenarios for search, neighborhoods, and topology

mod common;

use common::engine;
use forest::{ContextParams, ImportOptions, MetadataFilter, SemanticSearchParams};

#[tokio::test]
async fn semantic_search_finds_the_pinned_note() {
    let t = engine();
    t.pin_vector("Salmon migration", "upstream #ecology", vec![1.0, 0.0, 0.0]);
    t.pin_vector("Tax ledger", "numbers #finance", vec![0.0, 1.0, 0.0]);
    let salmon = t.capture("Salmon migration", "upstream #ecology").await;
    t.capture("Tax ledger", "numbers #finance").await;

    t.provider.set("salmon", vec![1.0, 0.0, 0.0]);
    let result = t
        .engine
        .semantic_search("salmon", &SemanticSearchParams::default())
        .await
        .unwrap();
    assert_eq!(result.hits[0].note_id, salmon.id);
    assert!(result.hits[0].similarity > 0.99);

    // The listing feeds ordinal resolution.
    let top = t.engine.get_note("@0").unwrap();
    assert_eq!(top.id, salmon.id);
}

#[tokio::test]
async fn chunks_stay_out_of_metadata_results() {
    let t = engine();
    t.engine
        .import_document(
            "Guide",
            "# One\n\nfirst part\n\n# Two\n\nsecond part",
            ImportOptions::default(),
        )
        .await
        .unwrap();
    t.capture("Standalone", "a plain note").await;

    let default_view = t.engine.metadata_search(&MetadataFilter::default()).unwrap();
    // Root + standalone; the two chunks stay hidden.
    assert_eq!(default_view.len(), 2);

    let with_chunks = t
        .engine
        .metadata_search(&MetadataFilter {
            show_chunks: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(with_chunks.len(), 4);
}

#[tokio::test]
async fn neighborhood_walks_structural_edges() {
    let t = engine();
    let outcome = t
        .engine
        .import_document(
            "Guide",
            "# One\n\nfirst\n\n# Two\n\nsecond\n\n# Three\n\nthird",
            ImportOptions::default(),
        )
        .await
        .unwrap();
    let root = outcome.root_note_id.unwrap();

    let hood = t.engine.neighborhood(root.as_str(), 1, 10).unwrap();
    assert_eq!(hood.notes.len(), 4, "root plus three chunks");
    assert!(hood.edges.len() >= 3);
}

#[tokio::test]
async fn context_summary_classifies_the_cluster() {
    let t = engine();
    // Orthogonal embeddings and disjoint vocab keep the linker quiet;
    // the topology here is purely the manual star.
    t.pin_vector("Hub note", "#cluster center", vec![1.0, 0.0, 0.0]);
    let hub = t.capture("Hub note", "#cluster center").await;
    let spoke_vectors = [
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![0.0, -1.0, 0.0],
    ];
    for (i, vector) in spoke_vectors.into_iter().enumerate() {
        let title = format!("Spoke {i}");
        let body = format!("satellite number {i}");
        t.pin_vector(&title, &body, vector);
        let other = t.capture(&title, &body).await;
        t.engine
            .link_manual(hub.id.as_str(), other.id.as_str())
            .unwrap();
    }

    let summary = t
        .engine
        .context(&ContextParams {
            tag: Some("cluster".to_string()),
            query: None,
            budget: 400,
        })
        .await
        .unwrap();
    assert_eq!(summary.hubs.len(), 1);
    assert_eq!(summary.hubs[0].note_id, hub.id);
    assert!(summary.rendered.contains("Hub note"));
    assert!(!summary.truncated);
}

#[tokio::test]
async fn backfill_restores_missing_chunk_rows() {
    use forest::{CaptureInput, DocumentId, NoteMetadata, Origin};

    let t = engine();
    // Simulate legacy data: chunk-flagged notes without document rows.
    let legacy_doc = DocumentId::new();
    for k in 0..2 {
        t.engine
            .capture(CaptureInput {
                title: format!("Legacy [{}/2]", k + 1),
                body: format!("legacy chunk {k}"),
                metadata: NoteMetadata {
                    origin: Origin::Import,
                    parent_document_id: Some(legacy_doc.clone()),
                    chunk_order: Some(k),
                    is_chunk: true,
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let repaired = t.engine.backfill_canonical_documents().unwrap();
    assert_eq!(repaired, 1);
    let chunks = t.engine.document_chunks(&legacy_doc).unwrap();
    assert_eq!(chunks.len(), 2);
    let document = t.engine.get_document(&legacy_doc).unwrap();
    assert_eq!(document.body, "legacy chunk 0\n\nlegacy chunk 1");

    // Idempotent: nothing left to repair.
    assert_eq!(t.engine.backfill_canonical_documents().unwrap(), 0);
}
