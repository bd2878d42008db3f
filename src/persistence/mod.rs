//! Persistence coordinator: decides when a room's document is written out.
//!
//! DESIGN
//! ======
//! Two timers bound every commit. The idle deadline moves out by `idle` on
//! each mutation, so a burst followed by quiet produces a single write. The
//! max deadline does not move, so continuous mutation still commits at least
//! every `max_wait`. Under sustained load the max window is anchored to the
//! previous commit's start, which keeps the gap between commits at or under
//! `max_wait` instead of drifting by one mutation interval per cycle.
//!
//! The coordinator owns scheduling only. The room actor asks it for the next
//! deadline, calls [`PersistenceCoordinator::poll`] when it expires, takes a
//! fresh snapshot of the document, and reports back how the write went.
//!
//! ERROR HANDLING
//! ==============
//! A failed write is never rolled back in memory. The coordinator becomes
//! dirty again and schedules a retry one idle period out; the retry writes
//! whatever the document holds at that point, not the failed payload.

pub mod store;

use tokio::time::Instant;

use crate::config::PersistConfig;

pub use store::{MemorySnapshotStore, PgSnapshotStore, SnapshotStore, StoreError};

#[derive(Debug)]
pub struct PersistenceCoordinator {
    config: PersistConfig,
    dirty: bool,
    in_flight: bool,
    idle_deadline: Option<Instant>,
    max_deadline: Option<Instant>,
    last_commit_start: Option<Instant>,
    commits_started: u64,
}

impl PersistenceCoordinator {
    #[must_use]
    pub fn new(config: PersistConfig) -> Self {
        Self {
            config,
            dirty: false,
            in_flight: false,
            idle_deadline: None,
            max_deadline: None,
            last_commit_start: None,
            commits_started: 0,
        }
    }

    /// Record that the document changed at `now`.
    pub fn note_mutation(&mut self, now: Instant) {
        self.dirty = true;
        self.idle_deadline = Some(now + self.config.idle);
        if self.max_deadline.is_none() {
            let anchor = match self.last_commit_start {
                Some(start) if now.saturating_duration_since(start) <= self.config.idle => start,
                _ => now,
            };
            self.max_deadline = Some(anchor + self.config.max_wait);
        }
    }

    /// When the next commit is due, if one is pending and none is running.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if !self.dirty || self.in_flight {
            return None;
        }
        match (self.idle_deadline, self.max_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start a commit if one is due. Returns `true` when the caller should
    /// snapshot the document and write it.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(due) if due <= now => {
                self.begin(now);
                true
            }
            _ => false,
        }
    }

    /// Start a commit now if anything is unsaved, regardless of deadlines.
    pub fn force(&mut self, now: Instant) -> bool {
        if !self.dirty || self.in_flight {
            return false;
        }
        self.begin(now);
        true
    }

    fn begin(&mut self, now: Instant) {
        self.dirty = false;
        self.in_flight = true;
        self.idle_deadline = None;
        self.max_deadline = None;
        self.last_commit_start = Some(now);
        self.commits_started += 1;
    }

    pub fn commit_succeeded(&mut self) {
        self.in_flight = false;
    }

    /// The last write failed. Mark dirty and retry after one idle period,
    /// unless a sooner deadline is already pending from newer mutations.
    pub fn commit_failed(&mut self, now: Instant) {
        self.in_flight = false;
        self.dirty = true;
        let retry = now + self.config.idle;
        self.idle_deadline = Some(self.idle_deadline.map_or(retry, |d| d.min(retry)));
        if self.max_deadline.is_none() {
            self.max_deadline = Some(now + self.config.max_wait);
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Nothing unsaved and nothing being written.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.dirty && !self.in_flight
    }

    #[must_use]
    pub fn commits_started(&self) -> u64 {
        self.commits_started
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
