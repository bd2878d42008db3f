//! Identity: who is on the other end of a websocket.
//!
//! ARCHITECTURE
//! ============
//! Authentication lives outside this service. Clients arrive with a one-time
//! ticket issued by the auth layer, and an [`IdentityProvider`] turns it into
//! `(user_id, display_name, role)`. Read-only viewers are rejected by both the
//! lock table and the AI executor.
//!
//! TRADE-OFFS
//! ==========
//! Ticket consumption is destructive (`DELETE ... RETURNING`) so a ticket
//! cannot be replayed; a dropped connection needs a fresh ticket.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::frame::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Editor,
    Viewer,
}

impl Role {
    #[must_use]
    pub fn can_edit(self) -> bool {
        matches!(self, Self::Editor)
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "editor" | "owner" | "admin" => Ok(Self::Editor),
            "viewer" | "readonly" | "read-only" => Ok(Self::Viewer),
            other => Err(IdentityError::UnknownRole(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl ErrorCode for IdentityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::UnknownRole(_) => "E_UNKNOWN_ROLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a ws ticket. `Ok(None)` means the ticket is unknown or expired.
    async fn authenticate(&self, ticket: &str) -> Result<Option<Identity>, IdentityError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn authenticate(&self, ticket: &str) -> Result<Option<Identity>, IdentityError> {
        let row = sqlx::query(
            r"WITH consumed AS (
                  DELETE FROM ws_tickets
                  WHERE ticket = $1 AND expires_at > now()
                  RETURNING user_id
              )
              SELECT u.id, u.name, u.role
              FROM consumed c
              JOIN users u ON u.id = c.user_id",
        )
        .bind(ticket)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.get("role");
        Ok(Some(Identity { user_id: row.get("id"), display_name: row.get("name"), role: role.parse()? }))
    }
}

// =============================================================================
// DEV
// =============================================================================

/// Accepts `name` or `name:role` tickets without any backing store. Only
/// enabled with `DEV_IDENTITY=1`.
pub struct DevIdentityProvider;

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    async fn authenticate(&self, ticket: &str) -> Result<Option<Identity>, IdentityError> {
        let (name, role) = match ticket.split_once(':') {
            Some((name, role)) => (name, role.parse()?),
            None => (ticket, Role::Editor),
        };
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(Identity { user_id: Uuid::new_v4(), display_name: name.to_owned(), role }))
    }
}
