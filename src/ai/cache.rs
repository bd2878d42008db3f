//! Bounded idempotency cache: recent command id -> recorded history entry.

use std::collections::{HashMap, VecDeque};

use crate::document::HistoryEntry;

/// Insertion-ordered ring. Once full, each insert evicts the oldest entry.
#[derive(Debug)]
pub struct CommandCache {
    order: VecDeque<String>,
    entries: HashMap<String, HistoryEntry>,
    capacity: usize,
}

impl CommandCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { order: VecDeque::new(), entries: HashMap::new(), capacity: capacity.max(1) }
    }

    #[must_use]
    pub fn get(&self, command_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(command_id)
    }

    /// Insert an entry. An id that is already cached keeps its first entry.
    pub fn insert(&mut self, entry: HistoryEntry) {
        if self.entries.contains_key(&entry.command_id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(entry.command_id.clone());
        self.entries.insert(entry.command_id.clone(), entry);
    }

    /// Seed from a retained history log, oldest first.
    pub fn warm<'a>(&mut self, history: impl IntoIterator<Item = &'a HistoryEntry>) {
        for entry in history {
            self.insert(entry.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
