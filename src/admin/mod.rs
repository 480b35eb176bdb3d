//! Admin batch orchestrator
//!
//! Bulk recompute/retag/rescore passes. Each pass processes one note
//! per transaction so concurrent user operations interleave; the
//! cancellation token is checked between units and a cancelled pass
//! returns its partial-progress report. A failing note is recorded in
//! the report, never fatal to the batch.

use crate::embed::EmbeddingProvider;
use crate::error::ForestResult;
use crate::events::{DomainEvent, EventBus, EventKind};
use crate::graph::{Note, NoteId};
use crate::ingest::normalize;
use crate::link::LinkingEngine;
use crate::store::SqliteStore;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// Cooperative cancellation token. The caller sets it; batches check it
/// between per-note units. Cancellation mid-unit has no effect until
/// the next check.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Partial-progress report returned by every batch operation.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: Vec<(NoteId, String)>,
    /// Informational conditions that did not stop the unit, e.g. an
    /// embedding left absent after provider retries.
    pub warnings: Vec<(NoteId, String)>,
    pub cancelled: bool,
    /// Accumulated provider cost, for LLM-backed tagging.
    pub total_cost: f64,
}

/// A tagging provider: derives the tag set a note should carry.
/// The default implementation reuses the normalizer; an LLM-backed
/// implementation slots in behind the same trait with cost tracking.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn derive_tags(&self, note: &Note) -> ForestResult<TagSuggestion>;
}

#[derive(Debug, Clone)]
pub struct TagSuggestion {
    pub tags: Vec<String>,
    pub cost: f64,
}

/// Tagger that rederives tags from the note text alone. Free.
pub struct NormalizerTagSource;

#[async_trait]
impl TagSource for NormalizerTagSource {
    async fn derive_tags(&self, note: &Note) -> ForestResult<TagSuggestion> {
        let normalized = normalize(&note.title, &note.body, &[]);
        Ok(TagSuggestion {
            tags: normalized.tags,
            cost: 0.0,
        })
    }
}

/// Options for [`Admin::retag_all`].
#[derive(Debug, Clone, Default)]
pub struct RetagOptions {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub skip: usize,
    /// Skip writes when the derived tags equal the current ones.
    pub skip_unchanged: bool,
}

pub struct Admin {
    store: Arc<SqliteStore>,
    provider: Arc<dyn EmbeddingProvider>,
    linker: Arc<LinkingEngine>,
    bus: EventBus,
}

impl Admin {
    pub fn new(
        store: Arc<SqliteStore>,
        provider: Arc<dyn EmbeddingProvider>,
        linker: Arc<LinkingEngine>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            provider,
            linker,
            bus,
        }
    }

    /// Re-embed every note with the current provider. Resumable: notes
    /// whose `embedding_model` already matches are skipped, so a
    /// restarted pass picks up where it stopped.
    pub async fn recompute_embeddings(
        &self,
        rescore: bool,
        cancel: &CancellationToken,
    ) -> ForestResult<BatchReport> {
        let span = info_span!("recompute_embeddings");
        let _guard = span.enter();
        let model_id = self.provider.model_id();
        let ids = self.store.all_note_ids()?;
        let total = ids.len();
        let mut report = BatchReport::default();

        for (index, id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(mut note) = self.store.get_note(id)? else {
                continue; // deleted mid-pass
            };
            report.processed += 1;
            if note.embedding_model.as_deref() == Some(model_id.as_str()) {
                report.skipped += 1;
                continue;
            }
            let text = crate::ingest::canonical_text(&note.title, &note.body);
            match self.provider.embed(&text).await {
                Ok(Some(vector)) => {
                    note.embedding = Some(vector);
                    note.embedding_model = Some(model_id.clone());
                }
                Ok(None) => {
                    // Proceeds with embedding-less scoring; informational.
                    if !text.trim().is_empty() {
                        report.warnings.push((
                            id.clone(),
                            crate::error::ForestError::EmbeddingUnavailable(
                                "provider returned no vector".to_string(),
                            )
                            .to_string(),
                        ));
                    }
                    note.clear_embedding();
                }
                Err(e) => {
                    warn!(note = %id, error = %e, "embedding failed, recorded");
                    report.failed.push((id.clone(), e.to_string()));
                    continue;
                }
            }
            note.updated_at = Utc::now();
            let event = DomainEvent::new(EventKind::NodeUpdated, vec![id.clone()], note.tags.clone())
                .with_payload(json!({
                    "embedding": true,
                    "title": false,
                    "body": false,
                    "tags": false,
                }));
            match self.store.put_note(&note, std::slice::from_ref(&event)) {
                Ok(()) => {
                    self.bus.publish(event);
                    report.changed += 1;
                }
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
            if (index + 1) % 50 == 0 {
                info!(done = index + 1, total, "recompute progress");
            }
        }

        if rescore && !report.cancelled {
            let rescore_report = self.rescore_all(cancel)?;
            report.cancelled = rescore_report.cancelled;
            report.failed.extend(rescore_report.failed);
        }
        info!(
            processed = report.processed,
            changed = report.changed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "recompute finished"
        );
        Ok(report)
    }

    /// Rederive every note's tags through `tagger`, writing differences
    /// unless `dry_run`.
    pub async fn retag_all(
        &self,
        tagger: &dyn TagSource,
        options: &RetagOptions,
        cancel: &CancellationToken,
    ) -> ForestResult<BatchReport> {
        let span = info_span!("retag_all");
        let _guard = span.enter();
        let ids = self.store.all_note_ids()?;
        let mut report = BatchReport::default();

        let window = ids
            .iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX));
        for id in window {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(mut note) = self.store.get_note(id)? else {
                continue;
            };
            report.processed += 1;
            let suggestion = match tagger.derive_tags(&note).await {
                Ok(s) => s,
                Err(e) => {
                    report.failed.push((id.clone(), e.to_string()));
                    continue;
                }
            };
            report.total_cost += suggestion.cost;

            let mut tags = suggestion.tags;
            tags.iter_mut().for_each(|t| *t = t.to_lowercase());
            tags.sort();
            tags.dedup();

            if tags == note.tags && options.skip_unchanged {
                report.skipped += 1;
                continue;
            }
            if options.dry_run {
                if tags != note.tags {
                    report.changed += 1;
                }
                continue;
            }
            let tags_changed = tags != note.tags;
            note.tags = tags;
            note.updated_at = Utc::now();
            let event = DomainEvent::new(EventKind::NodeUpdated, vec![id.clone()], note.tags.clone())
                .with_payload(json!({
                    "tags": tags_changed,
                    "title": false,
                    "body": false,
                }));
            match self.store.put_note(&note, std::slice::from_ref(&event)) {
                Ok(()) => {
                    self.bus.publish(event);
                    if tags_changed {
                        report.changed += 1;
                    }
                }
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }
        info!(
            processed = report.processed,
            changed = report.changed,
            cost = report.total_cost,
            "retag finished"
        );
        Ok(report)
    }

    /// Rescore every note's current edges. Safe to run concurrently
    /// with reads; one note per transaction.
    pub fn rescore_all(&self, cancel: &CancellationToken) -> ForestResult<BatchReport> {
        let span = info_span!("rescore_all");
        let _guard = span.enter();
        let ids = self.store.all_note_ids()?;
        let mut report = BatchReport::default();

        for id in &ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.linker.rescore_one(id) {
                Ok(link_report) => {
                    report.processed += 1;
                    if link_report.created + link_report.updated + link_report.removed > 0 {
                        report.changed += 1;
                    }
                    for event in link_report.events {
                        self.bus.publish(event);
                    }
                }
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }
        info!(
            processed = report.processed,
            changed = report.changed,
            cancelled = report.cancelled,
            "rescore finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;
    use crate::embed::MockProvider;
    use crate::graph::Note;

    fn setup() -> (Arc<SqliteStore>, Admin, Arc<MockProvider>) {
        let config = ForestConfig {
            embed_dimension: 3,
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory(&config).unwrap());
        let provider = Arc::new(MockProvider::new(3));
        let linker = Arc::new(LinkingEngine::new(store.clone(), &config));
        let admin = Admin::new(store.clone(), provider.clone(), linker, EventBus::new());
        (store, admin, provider)
    }

    fn put(store: &SqliteStore, title: &str, body: &str) -> Note {
        let n = normalize(title, body, &[]);
        let mut note = Note::new(title, body);
        note.tags = n.tags;
        note.token_counts = n.token_counts;
        store.put_note(&note, &[]).unwrap();
        note
    }

    #[tokio::test]
    async fn recompute_fills_missing_embeddings() {
        let (store, admin, _) = setup();
        let note = put(&store, "Salmon", "river fish");
        assert!(store.get_note(&note.id).unwrap().unwrap().embedding.is_none());

        let report = admin
            .recompute_embeddings(false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.changed, 1);
        let loaded = store.get_note(&note.id).unwrap().unwrap();
        assert!(loaded.embedding.is_some());
        assert_eq!(loaded.embedding_model.as_deref(), Some("mock:deterministic"));
    }

    #[tokio::test]
    async fn recompute_is_resumable() {
        let (store, admin, _) = setup();
        put(&store, "a", "x");
        put(&store, "b", "y");
        admin
            .recompute_embeddings(false, &CancellationToken::new())
            .await
            .unwrap();

        // A second pass finds every model id already current.
        let report = admin
            .recompute_embeddings(false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn cancelled_pass_reports_partial_progress() {
        let (store, admin, _) = setup();
        put(&store, "a", "x");
        put(&store, "b", "y");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = admin.recompute_embeddings(false, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn retag_dry_run_writes_nothing() {
        let (store, admin, _) = setup();
        let mut note = put(&store, "t", "body #fresh");
        note.tags = vec![]; // desync tags from content
        store.put_note(&note, &[]).unwrap();

        let report = admin
            .retag_all(
                &NormalizerTagSource,
                &RetagOptions {
                    dry_run: true,
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.changed, 1);
        assert!(store.get_note(&note.id).unwrap().unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn retag_writes_differences() {
        let (store, admin, _) = setup();
        let mut note = put(&store, "t", "body #fresh");
        note.tags = vec![];
        store.put_note(&note, &[]).unwrap();

        let report = admin
            .retag_all(
                &NormalizerTagSource,
                &RetagOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(
            store.get_note(&note.id).unwrap().unwrap().tags,
            vec!["fresh".to_string()]
        );
    }

    #[tokio::test]
    async fn retag_skip_unchanged_counts_skips() {
        let (store, admin, _) = setup();
        put(&store, "t", "body #stable");
        let report = admin
            .retag_all(
                &NormalizerTagSource,
                &RetagOptions {
                    skip_unchanged: true,
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.changed, 0);
    }
}
