//! Lock manager: per-shape soft locks held by sessions.
//!
//! DESIGN
//! ======
//! Each shape id is either unlocked or held by exactly one session. A select
//! replaces the session's whole selection and is all-or-nothing: if any
//! requested shape is held by someone else, nothing changes and the caller
//! gets the current holder back. Denial is an outcome, not an error.
//!
//! Sessions hold a lease refreshed by every command they send. The room's
//! periodic sweep drops the locks of sessions idle past the TTL. Locks are
//! never persisted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::document::ShapeId;
use crate::identity::Role;

pub type SessionId = Uuid;

/// Who holds a lock, as shown to other users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub session_id: SessionId,
    pub user_id: Uuid,
    pub user_name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Selection replaced. `acquired` are newly locked, `released` were held
    /// before and are not part of the new selection.
    Granted { acquired: Vec<ShapeId>, released: Vec<ShapeId> },
    /// Some requested shape belongs to another session. Nothing changed.
    Denied { shape_id: ShapeId, holder: LockHolder },
    /// The session may not lock anything.
    ReadOnly,
    UnknownSession,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditDenied {
    #[error("read-only session")]
    ReadOnly,
    #[error("shape {shape_id} is locked by {}", holder.user_name)]
    Locked { shape_id: ShapeId, holder: LockHolder },
    #[error("unknown session")]
    UnknownSession,
}

#[derive(Debug)]
struct Lease {
    holder: LockHolder,
    role: Role,
    held: BTreeSet<ShapeId>,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct LockTable {
    locks: HashMap<ShapeId, SessionId>,
    sessions: HashMap<SessionId, Lease>,
    ttl: Duration,
}

impl LockTable {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { locks: HashMap::new(), sessions: HashMap::new(), ttl }
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    pub fn open_session(&mut self, holder: LockHolder, role: Role, now: Instant) {
        let session_id = holder.session_id;
        self.release_session(session_id);
        self.sessions.insert(session_id, Lease { holder, role, held: BTreeSet::new(), last_seen: now });
    }

    /// Refresh a session's lease.
    pub fn touch(&mut self, session_id: SessionId, now: Instant) {
        if let Some(lease) = self.sessions.get_mut(&session_id) {
            lease.last_seen = now;
        }
    }

    /// Drop a session and release everything it held.
    pub fn release_session(&mut self, session_id: SessionId) -> Vec<ShapeId> {
        let Some(lease) = self.sessions.remove(&session_id) else {
            return Vec::new();
        };
        for id in &lease.held {
            self.locks.remove(id);
        }
        lease.held.into_iter().collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn has_session(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Release the locks of every session whose lease expired. The sessions
    /// stay registered and may select again.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(SessionId, Vec<ShapeId>)> {
        let mut swept = Vec::new();
        for (session_id, lease) in &mut self.sessions {
            if lease.held.is_empty() || now.saturating_duration_since(lease.last_seen) < self.ttl {
                continue;
            }
            let released: Vec<ShapeId> = std::mem::take(&mut lease.held).into_iter().collect();
            for id in &released {
                self.locks.remove(id);
            }
            swept.push((*session_id, released));
        }
        swept
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Replace the session's selection with `ids`, locking all of them or
    /// none.
    pub fn select(&mut self, session_id: SessionId, ids: &[ShapeId], now: Instant) -> SelectOutcome {
        let Some(lease) = self.sessions.get(&session_id) else {
            return SelectOutcome::UnknownSession;
        };
        if !lease.role.can_edit() {
            return SelectOutcome::ReadOnly;
        }

        for id in ids {
            if let Some(owner) = self.locks.get(id).filter(|owner| **owner != session_id) {
                let holder = self.sessions.get(owner).map(|l| l.holder.clone());
                if let Some(holder) = holder {
                    return SelectOutcome::Denied { shape_id: *id, holder };
                }
            }
        }

        let wanted: BTreeSet<ShapeId> = ids.iter().copied().collect();
        let Some(lease) = self.sessions.get_mut(&session_id) else {
            return SelectOutcome::UnknownSession;
        };
        lease.last_seen = now;
        let released: Vec<ShapeId> = lease.held.difference(&wanted).copied().collect();
        let acquired: Vec<ShapeId> = wanted.difference(&lease.held).copied().collect();
        lease.held = wanted;

        for id in &released {
            self.locks.remove(id);
        }
        for id in &acquired {
            self.locks.insert(*id, session_id);
        }
        SelectOutcome::Granted { acquired, released }
    }

    /// Release some or all of a session's locks. Ids the session does not
    /// hold are ignored.
    pub fn deselect(&mut self, session_id: SessionId, ids: Option<&[ShapeId]>, now: Instant) -> Vec<ShapeId> {
        let Some(lease) = self.sessions.get_mut(&session_id) else {
            return Vec::new();
        };
        lease.last_seen = now;
        let released: Vec<ShapeId> = match ids {
            Some(ids) => ids.iter().filter(|id| lease.held.remove(*id)).copied().collect(),
            None => std::mem::take(&mut lease.held).into_iter().collect(),
        };
        for id in &released {
            self.locks.remove(id);
        }
        released
    }

    /// Drop locks on shapes that no longer exist.
    pub fn forget_shapes(&mut self, ids: &[ShapeId]) -> Vec<ShapeId> {
        let mut released = Vec::new();
        for id in ids {
            if let Some(owner) = self.locks.remove(id) {
                if let Some(lease) = self.sessions.get_mut(&owner) {
                    lease.held.remove(id);
                }
                released.push(*id);
            }
        }
        released
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Check whether the session may interactively edit every shape in `ids`.
    ///
    /// # Errors
    ///
    /// Returns why the edit is not allowed: the session is read-only,
    /// unknown, or some shape is locked by another session.
    pub fn check_edit(&self, session_id: SessionId, ids: &[ShapeId]) -> Result<(), EditDenied> {
        let lease = self.sessions.get(&session_id).ok_or(EditDenied::UnknownSession)?;
        if !lease.role.can_edit() {
            return Err(EditDenied::ReadOnly);
        }
        for id in ids {
            if let Some(holder) = self.holder_of(*id).filter(|h| h.session_id != session_id) {
                return Err(EditDenied::Locked { shape_id: *id, holder: holder.clone() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn holder_of(&self, id: ShapeId) -> Option<&LockHolder> {
        self.locks.get(&id).and_then(|s| self.sessions.get(s)).map(|l| &l.holder)
    }

    #[must_use]
    pub fn selection(&self, session_id: SessionId) -> Vec<ShapeId> {
        self.sessions.get(&session_id).map(|l| l.held.iter().copied().collect()).unwrap_or_default()
    }

    /// Current lock map for display.
    #[must_use]
    pub fn view(&self) -> BTreeMap<ShapeId, LockHolder> {
        self.locks
            .iter()
            .filter_map(|(id, s)| self.sessions.get(s).map(|l| (*id, l.holder.clone())))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
#[path = "locks_test.rs"]
mod tests;
