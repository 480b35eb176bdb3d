//! End-to-end scenarios for capture, linking, and the threshold policy

mod common;

use common::engine;
use forest::{EdgeType, EventKind, NotePatch};

#[tokio::test]
async fn capture_and_link() {
    let t = engine();
    t.pin_vector(
        "Anadromous fish migration",
        "Fish that return from the sea #ecology #rivers",
        vec![1.0, 0.0, 0.0],
    );
    t.pin_vector(
        "Columbia river salmon runs",
        "Seasonal salmon runs #ecology #rivers",
        vec![1.0, 0.0, 0.0],
    );

    let a = t
        .capture(
            "Anadromous fish migration",
            "Fish that return from the sea #ecology #rivers",
        )
        .await;
    let b = t
        .capture(
            "Columbia river salmon runs",
            "Seasonal salmon runs #ecology #rivers",
        )
        .await;

    let edges = t.engine.edges_for(a.id.as_str()).unwrap();
    assert_eq!(edges.len(), 1, "exactly one edge A–B");
    let edge = &edges[0];
    assert!(edge.touches(&b.id));
    assert_eq!(edge.tag_score, 1.0);
    assert!((edge.components.embedding_similarity - 1.0).abs() < 1e-5);
    assert!(edge.score >= t.engine.config().accept_threshold);
    // Canonical orientation.
    assert!(edge.source_id.as_str() <= edge.target_id.as_str());
}

#[tokio::test]
async fn delete_cascade() {
    let t = engine();
    t.pin_vector("A", "#ecology #rivers", vec![1.0, 0.0, 0.0]);
    t.pin_vector("B", "#ecology #rivers", vec![1.0, 0.0, 0.0]);
    let a = t.capture("A", "#ecology #rivers").await;
    let b = t.capture("B", "#ecology #rivers").await;
    assert_eq!(t.engine.degree(b.id.as_str()).unwrap(), 1);

    let mut rx = t.engine.subscribe();
    t.engine.delete_note(a.id.as_str()).unwrap();

    // B remains with zero neighbors; no dangling edges.
    assert_eq!(t.engine.degree(b.id.as_str()).unwrap(), 0);
    assert!(t.engine.get_note(a.id.as_str()).is_err());

    // node.deleted then edge.deleted, in that order.
    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.kind, EventKind::NodeDeleted);
    assert_eq!(second.kind, EventKind::EdgeDeleted);
}

#[tokio::test]
async fn threshold_demotion() {
    let t = engine();
    let accept = t.engine.config().accept_threshold;
    t.pin_vector("Fish migration", "salmon upstream #ecology", vec![1.0, 0.0, 0.0]);
    t.pin_vector("Salmon runs", "salmon upstream #ecology", vec![1.0, 0.0, 0.0]);
    let a = t.capture("Fish migration", "salmon upstream #ecology").await;
    let b = t.capture("Salmon runs", "salmon upstream #ecology").await;

    let edge = &t.engine.edges_for(a.id.as_str()).unwrap()[0];
    assert!(edge.score >= accept);

    // Rewrite B with unrelated text; its new embedding is nearly
    // orthogonal (cosine ≈ 0.1) and no signals remain shared.
    t.pin_vector("Salmon runs", "quarterly accounting ledger", vec![0.1, 0.995, 0.0]);
    t.engine
        .update_note(
            b.id.as_str(),
            NotePatch {
                body: Some("quarterly accounting ledger".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The A–B edge is gone, and nothing below accept touches B.
    assert_eq!(t.engine.degree(a.id.as_str()).unwrap(), 0);
    for edge in t.engine.edges_for(b.id.as_str()).unwrap() {
        assert!(edge.score >= accept || !edge.edge_type.is_auto());
    }
}

#[tokio::test]
async fn manual_edge_outlives_demotion() {
    let t = engine();
    t.pin_vector("A", "alpha", vec![1.0, 0.0, 0.0]);
    t.pin_vector("B", "beta", vec![0.0, 1.0, 0.0]);
    let a = t.capture("A", "alpha").await;
    let b = t.capture("B", "beta").await;

    t.engine.link_manual(a.id.as_str(), b.id.as_str()).unwrap();
    // A rescore pass refreshes but never removes the manual edge.
    t.engine
        .rescore_all(&forest::CancellationToken::new())
        .unwrap();
    let edges = t.engine.edges_for(a.id.as_str()).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].edge_type, EdgeType::Manual);
}
