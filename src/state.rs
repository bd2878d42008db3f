//! Shared application state handed to every route.
//!
//! Everything mutable lives inside room actors; the state itself is a set
//! of cheap handles.

use std::sync::Arc;

use crate::identity::IdentityProvider;
use crate::room::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomRegistry,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    #[must_use]
    pub fn new(rooms: RoomRegistry, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { rooms, identity }
    }
}
