//! Process-local event bus
//!
//! Domain events are appended to the store's event log inside the
//! mutating transaction and broadcast here after commit. Subscribers
//! may filter by event kind and by involved-note tag set; the server
//! layer forwards to external subscribers with its own filtering.

use crate::graph::NoteId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::broadcast;

/// Domain event kinds. One or more fire on every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "node.created")]
    NodeCreated,
    #[serde(rename = "node.updated")]
    NodeUpdated,
    #[serde(rename = "node.deleted")]
    NodeDeleted,
    #[serde(rename = "edge.created")]
    EdgeCreated,
    #[serde(rename = "edge.updated")]
    EdgeUpdated,
    #[serde(rename = "edge.deleted")]
    EdgeDeleted,
    #[serde(rename = "document.imported")]
    DocumentImported,
    #[serde(rename = "document.updated")]
    DocumentUpdated,
    #[serde(rename = "snapshot.taken")]
    SnapshotTaken,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NodeCreated => "node.created",
            EventKind::NodeUpdated => "node.updated",
            EventKind::NodeDeleted => "node.deleted",
            EventKind::EdgeCreated => "edge.created",
            EventKind::EdgeUpdated => "edge.updated",
            EventKind::EdgeDeleted => "edge.deleted",
            EventKind::DocumentImported => "document.imported",
            EventKind::DocumentUpdated => "document.updated",
            EventKind::SnapshotTaken => "snapshot.taken",
        }
    }

    /// Kinds that count toward the auto-snapshot mutation threshold.
    pub fn is_graph_mutation(&self) -> bool {
        !matches!(self, EventKind::SnapshotTaken)
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node.created" => Ok(EventKind::NodeCreated),
            "node.updated" => Ok(EventKind::NodeUpdated),
            "node.deleted" => Ok(EventKind::NodeDeleted),
            "edge.created" => Ok(EventKind::EdgeCreated),
            "edge.updated" => Ok(EventKind::EdgeUpdated),
            "edge.deleted" => Ok(EventKind::EdgeDeleted),
            "document.imported" => Ok(EventKind::DocumentImported),
            "document.updated" => Ok(EventKind::DocumentUpdated),
            "snapshot.taken" => Ok(EventKind::SnapshotTaken),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One domain event. `payload` carries before/after state sufficient
/// for diff replay; the schema per kind is documented in temporal/.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Log sequence; 0 until assigned by the store's append.
    #[serde(default)]
    pub seq: u64,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    /// Notes involved (both endpoints for edge events).
    pub note_ids: Vec<NoteId>,
    /// Union of the involved notes' tags at event time, for
    /// subscription filtering.
    pub tags: Vec<String>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(kind: EventKind, note_ids: Vec<NoteId>, tags: Vec<String>) -> Self {
        Self {
            seq: 0,
            kind,
            at: Utc::now(),
            note_ids,
            tags,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Broadcast bus. Slow subscribers lag rather than block writers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish an event. Returns quietly when nobody is subscribed.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a kind/tag filter applied on the receiving side.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.sender.subscribe(),
            filter,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription filter: empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Vec<EventKind>,
    pub tags: Vec<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &DomainEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| event.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// A broadcast receiver that drops non-matching events.
pub struct FilteredReceiver {
    inner: broadcast::Receiver<DomainEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<DomainEvent, broadcast::error::RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::new(
            EventKind::NodeCreated,
            vec![NoteId::from_string("a")],
            vec!["ecology".to_string()],
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::NodeCreated);
    }

    #[tokio::test]
    async fn filter_drops_non_matching_kinds() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_filtered(EventFilter {
            kinds: vec![EventKind::EdgeCreated],
            tags: vec![],
        });
        bus.publish(DomainEvent::new(EventKind::NodeCreated, vec![], vec![]));
        bus.publish(DomainEvent::new(EventKind::EdgeCreated, vec![], vec![]));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::EdgeCreated);
    }

    #[tokio::test]
    async fn filter_matches_tag_intersection() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_filtered(EventFilter {
            kinds: vec![],
            tags: vec!["rivers".to_string()],
        });
        bus.publish(
            DomainEvent::new(EventKind::NodeUpdated, vec![], vec!["ecology".to_string()]),
        );
        bus.publish(
            DomainEvent::new(EventKind::NodeUpdated, vec![], vec!["rivers".to_string()]),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.tags, vec!["rivers".to_string()]);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            EventKind::NodeCreated,
            EventKind::EdgeDeleted,
            EventKind::DocumentImported,
            EventKind::SnapshotTaken,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }
}
