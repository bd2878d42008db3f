//! Snapshot stores: one durable record per room.
//!
//! The Postgres store upserts the whole document snapshot as JSONB. The
//! in-memory store backs local development without a database and doubles as
//! the test store, with switches for injecting load and save failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::document::DocumentSnapshot;
use crate::frame::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("snapshot store unavailable")]
    Unavailable,
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::Serialize(_) => "E_SNAPSHOT_ENCODING",
            Self::Unavailable => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::Serialize(_))
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for a room, or `None` if the room was never saved.
    async fn load(&self, room_id: &str) -> Result<Option<DocumentSnapshot>, StoreError>;

    /// Replace the room's snapshot.
    async fn save(&self, room_id: &str, snapshot: &DocumentSnapshot) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, room_id: &str) -> Result<Option<DocumentSnapshot>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM room_snapshots WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row.get("snapshot");
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn save(&self, room_id: &str, snapshot: &DocumentSnapshot) -> Result<(), StoreError> {
        let value = serde_json::to_value(snapshot)?;
        sqlx::query(
            r"INSERT INTO room_snapshots (room_id, snapshot, updated_at)
              VALUES ($1, $2, now())
              ON CONFLICT (room_id) DO UPDATE
              SET snapshot = EXCLUDED.snapshot, updated_at = EXCLUDED.updated_at",
        )
        .bind(room_id)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemorySnapshotStore {
    rooms: Mutex<HashMap<String, DocumentSnapshot>>,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<DocumentSnapshot> {
        self.rooms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    pub fn put(&self, room_id: &str, snapshot: DocumentSnapshot) {
        self.rooms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(room_id.to_owned(), snapshot);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, room_id: &str) -> Result<Option<DocumentSnapshot>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.get(room_id))
    }

    async fn save(&self, room_id: &str, snapshot: &DocumentSnapshot) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.put(room_id, snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
