//! Append-only AI command history with bounded retention.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::shape::ShapeId;

/// Immutable record of one AI command and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command_id: String,
    pub user_id: Uuid,
    pub user_name: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    pub prompt: String,
    pub success: bool,
    pub affected_shape_ids: Vec<ShapeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// History log ordered by `(timestamp, command_id)` and capped at `capacity`
/// entries. The oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    index: HashSet<String>,
    capacity: usize,
}

impl HistoryLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), index: HashSet::new(), capacity: capacity.max(1) }
    }

    #[must_use]
    pub fn contains(&self, command_id: &str) -> bool {
        self.index.contains(command_id)
    }

    #[must_use]
    pub fn get(&self, command_id: &str) -> Option<&HistoryEntry> {
        if !self.contains(command_id) {
            return None;
        }
        self.entries.iter().find(|e| e.command_id == command_id)
    }

    /// Insert an entry unless its command id is already present. Returns
    /// `true` if the entry is retained after the capacity bound is applied.
    pub fn append(&mut self, entry: HistoryEntry) -> bool {
        if self.index.contains(&entry.command_id) {
            return false;
        }

        // Entries almost always arrive in order; scan from the back.
        let key = (entry.timestamp, entry.command_id.as_str());
        let pos = self
            .entries
            .iter()
            .rposition(|e| (e.timestamp, e.command_id.as_str()) <= key)
            .map_or(0, |p| p + 1);

        let command_id = entry.command_id.clone();
        self.entries.insert(pos, entry);
        self.index.insert(command_id.clone());

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.index.remove(&evicted.command_id);
            }
        }
        self.index.contains(&command_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
