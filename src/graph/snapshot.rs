//! Graph snapshots — immutable baselines for diff and growth

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Manual,
    Auto,
}

impl FromStr for SnapshotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(SnapshotType::Manual),
            "auto" => Ok(SnapshotType::Auto),
            _ => Err(format!("unknown snapshot type: {}", s)),
        }
    }
}

impl std::fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotType::Manual => write!(f, "manual"),
            SnapshotType::Auto => write!(f, "auto"),
        }
    }
}

/// An immutable record of graph counts and digests at a point in time.
///
/// `event_cursor` is the event-log sequence number at capture time; diff
/// replays the log from there. Snapshots may be garbage-collected by the
/// retention policy but are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub taken_at: DateTime<Utc>,
    pub snapshot_type: SnapshotType,
    pub node_count: u64,
    pub edge_count: u64,
    pub tag_count: u64,
    pub nodes_digest: String,
    pub edges_digest: String,
    pub tags_digest: String,
    /// Event-log replay cursor: the highest event sequence number
    /// included in this snapshot.
    pub event_cursor: u64,
}
