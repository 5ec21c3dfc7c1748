//! Room store: durable room records, bounded event logs and presence mirrors.
//!
//! DESIGN
//! ======
//! `RoomStore` is the seam between the relay and whatever keeps rooms across
//! restarts. `PgRoomStore` is used when `DATABASE_URL` is configured;
//! `MemoryRoomStore` otherwise and in tests. Both enforce the same contract:
//! the event log of a room is trimmed to the newest `cap` entries on every
//! append, snapshots are overwritten last-write-wins, and operations on a
//! missing room fail with `StoreError::NotFound`.
//!
//! ERROR HANDLING
//! ==============
//! Database failures are reported as `StoreError::Database` and marked
//! retryable. Callers decide whether a failure is surfaced (snapshot saves)
//! or logged and swallowed (log appends, presence writes).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;
use whiteboard_frames::{DrawingEventKind, DrawingRecord, RoomId, now_ms};

use crate::error::ErrorCode;

/// Maximum entries kept in a room's event log.
pub const EVENT_LOG_CAP: usize = 1000;

/// Rooms returned by the public listing.
pub const PUBLIC_ROOM_LIMIT: usize = 50;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    NotFound(RoomId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
            Self::Decode(_) => "E_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// One entry of a room's presence mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub username: String,
    pub connection_id: String,
}

/// Request to create a room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub is_public: bool,
    pub created_by: String,
}

/// A room as stored. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub is_public: bool,
    pub created_by: String,
    /// Latest saved canvas snapshot blob.
    pub canvas_data: Option<String>,
    pub active_users: Vec<PresenceEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RoomRecord {
    fn new(room: NewRoom) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            name: room.name,
            is_public: room.is_public,
            created_by: room.created_by,
            canvas_data: None,
            active_users: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create a room with a fresh id.
    async fn create_room(&self, room: NewRoom) -> Result<RoomRecord, StoreError>;

    async fn find_room(&self, room_id: &str) -> Result<RoomRecord, StoreError>;

    /// Newest public rooms first.
    async fn list_public_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError>;

    /// Append to the room's event log, dropping the oldest entries so at most
    /// `cap` remain. Returns the log length after trimming.
    async fn append_event(&self, room_id: &str, record: &DrawingRecord, cap: usize) -> Result<usize, StoreError>;

    /// The room's event log, oldest first.
    async fn event_log(&self, room_id: &str) -> Result<Vec<DrawingRecord>, StoreError>;

    /// Replace the room's presence mirror.
    async fn set_presence(&self, room_id: &str, users: &[PresenceEntry]) -> Result<(), StoreError>;

    /// Overwrite the room's canvas snapshot.
    async fn save_snapshot(&self, room_id: &str, blob: &str) -> Result<(), StoreError>;
}

// =============================================================================
// MEMORY
// =============================================================================

struct MemoryRoom {
    record: RoomRecord,
    events: VecDeque<DrawingRecord>,
    seq: u64,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, MemoryRoom>>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: NewRoom) -> Result<RoomRecord, StoreError> {
        let record = RoomRecord::new(room);
        let mut rooms = self.rooms.write().await;
        let seq = rooms.len() as u64;
        rooms.insert(record.id.clone(), MemoryRoom { record: record.clone(), events: VecDeque::new(), seq });
        Ok(record)
    }

    async fn find_room(&self, room_id: &str) -> Result<RoomRecord, StoreError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|room| room.record.clone())
            .ok_or_else(|| StoreError::NotFound(room_id.to_owned()))
    }

    async fn list_public_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError> {
        let rooms = self.rooms.read().await;
        let mut public: Vec<&MemoryRoom> = rooms.values().filter(|room| room.record.is_public).collect();
        public.sort_by(|a, b| (b.record.created_at, b.seq).cmp(&(a.record.created_at, a.seq)));
        Ok(public.into_iter().take(limit).map(|room| room.record.clone()).collect())
    }

    async fn append_event(&self, room_id: &str, record: &DrawingRecord, cap: usize) -> Result<usize, StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| StoreError::NotFound(room_id.to_owned()))?;
        room.events.push_back(record.clone());
        while room.events.len() > cap {
            room.events.pop_front();
        }
        room.record.updated_at = now_ms();
        Ok(room.events.len())
    }

    async fn event_log(&self, room_id: &str) -> Result<Vec<DrawingRecord>, StoreError> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(room_id).ok_or_else(|| StoreError::NotFound(room_id.to_owned()))?;
        Ok(room.events.iter().cloned().collect())
    }

    async fn set_presence(&self, room_id: &str, users: &[PresenceEntry]) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| StoreError::NotFound(room_id.to_owned()))?;
        room.record.active_users = users.to_vec();
        room.record.updated_at = now_ms();
        Ok(())
    }

    async fn save_snapshot(&self, room_id: &str, blob: &str) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or_else(|| StoreError::NotFound(room_id.to_owned()))?;
        room.record.canvas_data = Some(blob.to_owned());
        room.record.updated_at = now_ms();
        Ok(())
    }
}

// =============================================================================
// POSTGRES
// =============================================================================

type RoomRow = (String, String, bool, String, Option<String>, Value, i64, i64);

const ROOM_COLUMNS: &str = "id, name, is_public, created_by, canvas_data, active_users, created_at, updated_at";

pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_room(&self, room_id: &str) -> Result<(), StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1)")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        if exists { Ok(()) } else { Err(StoreError::NotFound(room_id.to_owned())) }
    }
}

fn room_from_row(row: RoomRow) -> Result<RoomRecord, StoreError> {
    let (id, name, is_public, created_by, canvas_data, active_users, created_at, updated_at) = row;
    Ok(RoomRecord {
        id,
        name,
        is_public,
        created_by,
        canvas_data,
        active_users: serde_json::from_value(active_users)?,
        created_at,
        updated_at,
    })
}

fn cap_as_i64(cap: usize) -> i64 {
    i64::try_from(cap).unwrap_or(i64::MAX)
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn create_room(&self, room: NewRoom) -> Result<RoomRecord, StoreError> {
        let record = RoomRecord::new(room);
        sqlx::query(
            "INSERT INTO rooms (id, name, is_public, created_by, active_users, created_at, updated_at)
             VALUES ($1, $2, $3, $4, '[]'::jsonb, $5, $6)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.is_public)
        .bind(&record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_room(&self, room_id: &str) -> Result<RoomRecord, StoreError> {
        let row = sqlx::query_as::<_, RoomRow>(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"))
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => room_from_row(row),
            None => Err(StoreError::NotFound(room_id.to_owned())),
        }
    }

    async fn list_public_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RoomRow>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE is_public ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(cap_as_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(room_from_row).collect()
    }

    async fn append_event(&self, room_id: &str, record: &DrawingRecord, cap: usize) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent appends to the same room.
        let locked: Option<String> = sqlx::query_scalar("SELECT id FROM rooms WHERE id = $1 FOR UPDATE")
            .bind(room_id)
            .fetch_optional(tx.as_mut())
            .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound(room_id.to_owned()));
        }

        sqlx::query(
            "INSERT INTO room_events (room_id, kind, data, user_id, username, ts)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(room_id)
        .bind(record.kind.as_str())
        .bind(&record.data)
        .bind(&record.user_id)
        .bind(&record.username)
        .bind(record.timestamp)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(
            "DELETE FROM room_events
             WHERE room_id = $1
               AND id NOT IN (SELECT id FROM room_events WHERE room_id = $1 ORDER BY id DESC LIMIT $2)",
        )
        .bind(room_id)
        .bind(cap_as_i64(cap))
        .execute(tx.as_mut())
        .await?;

        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM room_events WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(tx.as_mut())
            .await?;

        sqlx::query("UPDATE rooms SET updated_at = $2 WHERE id = $1")
            .bind(room_id)
            .bind(now_ms())
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;
        Ok(usize::try_from(len).unwrap_or_default())
    }

    async fn event_log(&self, room_id: &str) -> Result<Vec<DrawingRecord>, StoreError> {
        self.ensure_room(room_id).await?;
        let rows = sqlx::query_as::<_, (String, Value, String, String, i64)>(
            "SELECT kind, data, user_id, username, ts FROM room_events WHERE room_id = $1 ORDER BY id ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        let mut log = Vec::with_capacity(rows.len());
        for (kind, data, user_id, username, timestamp) in rows {
            let Some(kind) = DrawingEventKind::parse(&kind) else {
                warn!(%room_id, %kind, "store: skipping log entry with unknown kind");
                continue;
            };
            log.push(DrawingRecord { kind, data, user_id, username, timestamp });
        }
        Ok(log)
    }

    async fn set_presence(&self, room_id: &str, users: &[PresenceEntry]) -> Result<(), StoreError> {
        let users = serde_json::to_value(users)?;
        let result = sqlx::query("UPDATE rooms SET active_users = $2, updated_at = $3 WHERE id = $1")
            .bind(room_id)
            .bind(&users)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(room_id.to_owned()));
        }
        Ok(())
    }

    async fn save_snapshot(&self, room_id: &str, blob: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE rooms SET canvas_data = $2, updated_at = $3 WHERE id = $1")
            .bind(room_id)
            .bind(blob)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(room_id.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
