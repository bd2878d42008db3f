//! Room registry: room id to running actor.
//!
//! Rooms are spawned on first use and remove themselves when they stop, so
//! the map only ever holds live handles plus, briefly, one that is closing.
//! A handle found closed is replaced on the spot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use super::{JoinState, RoomCommand, RoomDeps, RoomHandle, spawn};
use crate::error::RoomError;
use crate::frame::Frame;
use crate::identity::Identity;
use crate::locks::SessionId;

pub(crate) type Rooms = Arc<RwLock<HashMap<String, RoomHandle>>>;

#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Rooms,
    deps: RoomDeps,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(deps: RoomDeps) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), deps }
    }

    /// Handle for `room_id`, spawning the room if it is not running.
    pub async fn handle(&self, room_id: &str) -> RoomHandle {
        {
            let rooms = self.rooms.read().await;
            if let Some(handle) = rooms.get(room_id).filter(|h| !h.is_closed()) {
                return handle.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(room_id).filter(|h| !h.is_closed()) {
            return handle.clone();
        }
        let handle = spawn(room_id.to_owned(), self.deps.clone(), Some(Arc::clone(&self.rooms)));
        rooms.insert(room_id.to_owned(), handle.clone());
        handle
    }

    /// Join a session to a room. A room that stops between lookup and join
    /// (idle eviction, failed hydrate) is respawned once.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the room cannot be brought up.
    pub async fn join(
        &self,
        room_id: &str,
        session_id: SessionId,
        identity: Identity,
        color: Option<String>,
        events: mpsc::Sender<Frame>,
    ) -> Result<(RoomHandle, JoinState), RoomError> {
        let handle = self.handle(room_id).await;
        match handle.join(session_id, identity.clone(), color.clone(), events.clone()).await {
            Err(RoomError::Unavailable(reason)) => {
                debug!(%room_id, %reason, "room: join raced a stopping room, retrying");
                let handle = self.handle(room_id).await;
                let state = handle.join(session_id, identity, color, events).await?;
                Ok((handle, state))
            }
            other => other.map(|state| (handle, state)),
        }
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.get(room_id).is_some_and(|h| !h.is_closed())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stop every room, waiting for each to write out unsaved state.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = self.rooms.write().await.drain().map(|(_, h)| h).collect();
        info!(rooms = handles.len(), "room: shutting down all rooms");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Remove `room_id` if it still maps to the channel behind `tx`. A newer
/// room spawned under the same id is left alone.
pub(crate) async fn deregister(rooms: &Rooms, room_id: &str, tx: &mpsc::Sender<RoomCommand>) {
    let mut rooms = rooms.write().await;
    if rooms.get(room_id).is_some_and(|h| h.same_room(tx)) {
        rooms.remove(room_id);
    }
}
