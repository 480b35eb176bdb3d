//! Temporal subsystem: snapshots, diff, growth
//!
//! Snapshots record counts, content digests, and an event-log cursor in
//! one transaction. Diff replays the log from the baseline's cursor and
//! folds per-entity net effects, so a created-then-deleted note cancels
//! out. Growth produces an evenly downsampled timeline plus one
//! synthetic live point.

use crate::config::AutoSnapshotConfig;
use crate::error::ForestResult;
use crate::events::{DomainEvent, EventKind};
use crate::graph::{NoteId, Snapshot, SnapshotId, SnapshotType};
use crate::store::{SnapshotFilter, SqliteStore};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Edge score deltas below this are noise, not "changed".
pub const SCORE_NOISE: f32 = 0.001;

/// A bounded list with an overflow count. `items.len() + truncated` is
/// the true total.
#[derive(Debug, Clone)]
pub struct Bounded<T> {
    pub items: Vec<T>,
    pub truncated: usize,
}

impl<T> Bounded<T> {
    fn take(mut all: Vec<T>, limit: usize) -> Self {
        let truncated = all.len().saturating_sub(limit);
        all.truncate(limit);
        Self {
            items: all,
            truncated,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len() + self.truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub nodes: u64,
    pub edges: u64,
    pub tags: u64,
}

#[derive(Debug, Clone)]
pub struct NodesDiff {
    pub added: Bounded<NoteId>,
    pub removed: Bounded<NoteId>,
    /// Title, body, or tags changed.
    pub updated: Bounded<NoteId>,
}

#[derive(Debug, Clone)]
pub struct EdgeScoreChange {
    pub source_id: NoteId,
    pub target_id: NoteId,
    pub before_score: f32,
    pub after_score: f32,
}

#[derive(Debug, Clone)]
pub struct EdgesDiff {
    pub added: Bounded<(NoteId, NoteId)>,
    pub removed: Bounded<(NoteId, NoteId)>,
    pub changed: Bounded<EdgeScoreChange>,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub baseline: Option<Snapshot>,
    /// True when no snapshot predates `since` and an empty baseline was
    /// synthesized.
    pub synthetic_baseline: bool,
    pub warning: Option<String>,
    pub nodes: NodesDiff,
    pub edges: EdgesDiff,
    pub before: Counts,
    pub after: Counts,
}

#[derive(Debug, Clone)]
pub struct GrowthPoint {
    pub taken_at: DateTime<Utc>,
    pub node_count: u64,
    pub edge_count: u64,
    pub tag_count: u64,
    /// The synthetic point at the current instant.
    pub live: bool,
}

pub struct Temporal {
    store: Arc<SqliteStore>,
    auto: AutoSnapshotConfig,
}

impl Temporal {
    pub fn new(store: Arc<SqliteStore>, auto: AutoSnapshotConfig) -> Self {
        Self { store, auto }
    }

    /// Record a snapshot of current counts and digests. The event
    /// cursor makes it a diff baseline.
    pub fn create_snapshot(
        &self,
        snapshot_type: SnapshotType,
    ) -> ForestResult<(Snapshot, Vec<DomainEvent>)> {
        let counts = self.current_counts()?;
        let (nodes_digest, edges_digest, tags_digest) = self.digests()?;
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            taken_at: Utc::now(),
            snapshot_type,
            node_count: counts.nodes,
            edge_count: counts.edges,
            tag_count: counts.tags,
            nodes_digest,
            edges_digest,
            tags_digest,
            event_cursor: self.store.event_cursor()?,
        };
        let events = vec![DomainEvent::new(EventKind::SnapshotTaken, Vec::new(), Vec::new())
            .with_payload(json!({
                "snapshot_id": snapshot.id.as_str(),
                "snapshot_type": snapshot.snapshot_type.to_string(),
                "node_count": snapshot.node_count,
                "edge_count": snapshot.edge_count,
                "tag_count": snapshot.tag_count,
            }))];
        self.store.put_snapshot(&snapshot, &events)?;
        info!(id = %snapshot.id, kind = %snapshot.snapshot_type, "snapshot taken");
        Ok((snapshot, events))
    }

    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> ForestResult<Vec<Snapshot>> {
        Ok(self.store.list_snapshots(filter)?)
    }

    /// Differences between now and the latest snapshot at or before
    /// `since`, computed by replaying the event log from the baseline's
    /// cursor. Lists are bounded per section by `section_limit`.
    pub fn diff(&self, since: DateTime<Utc>, section_limit: usize) -> ForestResult<DiffReport> {
        let baseline = self.store.latest_snapshot_at_or_before(since)?;
        let (cursor, before, synthetic) = match &baseline {
            Some(s) => (
                s.event_cursor,
                Counts {
                    nodes: s.node_count,
                    edges: s.edge_count,
                    tags: s.tag_count,
                },
                false,
            ),
            None => (
                0,
                Counts {
                    nodes: 0,
                    edges: 0,
                    tags: 0,
                },
                true,
            ),
        };

        // Per-entity fold over the replay window.
        #[derive(Default)]
        struct NodeState {
            existed_before: bool,
            exists_now: bool,
            content_changed: bool,
        }
        struct EdgeState {
            before_score: Option<f32>,
            after_score: Option<f32>,
        }

        let mut node_states: BTreeMap<NoteId, NodeState> = BTreeMap::new();
        let mut edge_states: BTreeMap<(NoteId, NoteId), EdgeState> = BTreeMap::new();

        for event in self.store.events_after(cursor)? {
            match event.kind {
                EventKind::NodeCreated => {
                    let id = match event.note_ids.first() {
                        Some(id) => id.clone(),
                        None => continue,
                    };
                    let state = node_states.entry(id).or_insert(NodeState {
                        existed_before: false,
                        exists_now: false,
                        content_changed: false,
                    });
                    state.exists_now = true;
                }
                EventKind::NodeUpdated => {
                    let id = match event.note_ids.first() {
                        Some(id) => id.clone(),
                        None => continue,
                    };
                    let content = ["title", "body", "tags"].iter().any(|k| {
                        event.payload.get(k).and_then(|v| v.as_bool()).unwrap_or(false)
                    });
                    let state = node_states.entry(id).or_insert(NodeState {
                        existed_before: true,
                        exists_now: true,
                        content_changed: false,
                    });
                    state.exists_now = true;
                    state.content_changed |= content;
                }
                EventKind::NodeDeleted => {
                    let id = match event.note_ids.first() {
                        Some(id) => id.clone(),
                        None => continue,
                    };
                    let state = node_states.entry(id).or_insert(NodeState {
                        existed_before: true,
                        exists_now: true,
                        content_changed: false,
                    });
                    state.exists_now = false;
                }
                EventKind::EdgeCreated | EventKind::EdgeUpdated | EventKind::EdgeDeleted => {
                    let (Some(a), Some(b)) = (event.note_ids.first(), event.note_ids.get(1))
                    else {
                        continue;
                    };
                    let key = crate::graph::canonical_pair(a.clone(), b.clone());
                    let before = event
                        .payload
                        .get("before_score")
                        .and_then(|v| v.as_f64())
                        .map(|v| v as f32);
                    let after = event
                        .payload
                        .get("after_score")
                        .and_then(|v| v.as_f64())
                        .map(|v| v as f32);
                    let state = edge_states.entry(key).or_insert(EdgeState {
                        before_score: before,
                        after_score: None,
                    });
                    state.after_score = after;
                }
                EventKind::DocumentImported
                | EventKind::DocumentUpdated
                | EventKind::SnapshotTaken => {}
            }
        }

        let mut nodes_added = Vec::new();
        let mut nodes_removed = Vec::new();
        let mut nodes_updated = Vec::new();
        for (id, state) in node_states {
            match (state.existed_before, state.exists_now) {
                (false, true) => nodes_added.push(id),
                (true, false) => nodes_removed.push(id),
                (true, true) if state.content_changed => nodes_updated.push(id),
                _ => {}
            }
        }

        let mut edges_added = Vec::new();
        let mut edges_removed = Vec::new();
        let mut edges_changed = Vec::new();
        for ((source, target), state) in edge_states {
            match (state.before_score, state.after_score) {
                (None, Some(_)) => edges_added.push((source, target)),
                (Some(_), None) => edges_removed.push((source, target)),
                (Some(before), Some(after)) if (after - before).abs() > SCORE_NOISE => {
                    edges_changed.push(EdgeScoreChange {
                        source_id: source,
                        target_id: target,
                        before_score: before,
                        after_score: after,
                    });
                }
                _ => {}
            }
        }

        let report = DiffReport {
            warning: if synthetic {
                Some(format!(
                    "no snapshot at or before {since}; diff runs against an empty baseline"
                ))
            } else {
                None
            },
            synthetic_baseline: synthetic,
            baseline,
            nodes: NodesDiff {
                added: Bounded::take(nodes_added, section_limit),
                removed: Bounded::take(nodes_removed, section_limit),
                updated: Bounded::take(nodes_updated, section_limit),
            },
            edges: EdgesDiff {
                added: Bounded::take(edges_added, section_limit),
                removed: Bounded::take(edges_removed, section_limit),
                changed: Bounded::take(edges_changed, section_limit),
            },
            before,
            after: self.current_counts()?,
        };
        Ok(report)
    }

    /// Timeline of snapshot counts in the range plus one live point,
    /// downsampled by even spacing to at most `limit` points.
    pub fn growth(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ForestResult<Vec<GrowthPoint>> {
        let mut snapshots = self.store.list_snapshots(&SnapshotFilter {
            since,
            until,
            ..Default::default()
        })?;
        snapshots.reverse(); // ascending

        let mut points: Vec<GrowthPoint> = snapshots
            .into_iter()
            .map(|s| GrowthPoint {
                taken_at: s.taken_at,
                node_count: s.node_count,
                edge_count: s.edge_count,
                tag_count: s.tag_count,
                live: false,
            })
            .collect();

        let limit = limit.max(2);
        if points.len() > limit - 1 {
            points = downsample(points, limit - 1);
        }

        let counts = self.current_counts()?;
        points.push(GrowthPoint {
            taken_at: Utc::now(),
            node_count: counts.nodes,
            edge_count: counts.edges,
            tag_count: counts.tags,
            live: true,
        });
        Ok(points)
    }

    /// Auto-snapshot policy: wall-clock interval elapsed, or mutation
    /// delta over threshold. Also sweeps expired auto snapshots.
    pub fn maybe_auto_snapshot(&self) -> ForestResult<Option<(Snapshot, Vec<DomainEvent>)>> {
        let last = self.store.latest_snapshot()?;
        let due = match &last {
            None => self.store.count_mutations_after(0)? > 0,
            Some(last) => {
                let elapsed = Utc::now() - last.taken_at;
                elapsed >= Duration::seconds(self.auto.interval_seconds as i64)
                    || self.store.count_mutations_after(last.event_cursor)?
                        >= self.auto.mutation_threshold
            }
        };
        if !due {
            return Ok(None);
        }
        let taken = self.create_snapshot(SnapshotType::Auto)?;

        let cutoff = Utc::now() - Duration::days(self.auto.retention_days as i64);
        let swept = self.store.delete_auto_snapshots_before(cutoff)?;
        if swept > 0 {
            debug!(swept, "expired auto snapshots removed");
        }
        Ok(Some(taken))
    }

    fn current_counts(&self) -> ForestResult<Counts> {
        Ok(Counts {
            nodes: self.store.count_notes()?,
            edges: self.store.count_edges()?,
            tags: self.store.count_tags()?,
        })
    }

    /// Content digests over sorted canonical lines.
    fn digests(&self) -> ForestResult<(String, String, String)> {
        let mut node_lines: Vec<String> = self
            .store
            .all_notes()?
            .iter()
            .map(|n| format!("{}\t{}", n.id, n.updated_at.to_rfc3339()))
            .collect();
        node_lines.sort();

        let mut edge_lines: Vec<String> = self
            .store
            .all_edges()?
            .iter()
            .map(|e| format!("{}\t{}\t{:.6}", e.source_id, e.target_id, e.score))
            .collect();
        edge_lines.sort();

        let mut tag_lines: Vec<String> = self
            .store
            .all_tags()?
            .iter()
            .map(|(tag, count)| format!("{tag}\t{count}"))
            .collect();
        tag_lines.sort();

        Ok((
            digest(&node_lines),
            digest(&edge_lines),
            digest(&tag_lines),
        ))
    }
}

fn digest(lines: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Even-spaced downsample keeping first and last points.
fn downsample(points: Vec<GrowthPoint>, target: usize) -> Vec<GrowthPoint> {
    if points.len() <= target || target < 2 {
        return points;
    }
    let last = points.len() - 1;
    let mut picked: Vec<usize> = (0..target)
        .map(|i| i * last / (target - 1))
        .collect();
    picked.dedup();
    picked
        .into_iter()
        .map(|i| points[i].clone())
        .collect()
}
