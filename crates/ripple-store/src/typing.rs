use async_trait::async_trait;
use chrono::Utc;

use ripple_core::errors::RelayError;
use ripple_core::ids::{RoomId, UserId};
use ripple_core::presence::TypingStore;

use crate::database::Database;

/// SQLite-backed typing store for multi-instance deployments, where the
/// REST collaborator may read from a different process than the gateway
/// that wrote. Same contract as the in-memory store: last write wins,
/// absent rows read as false.
pub struct SqliteTypingStore {
    db: Database,
}

impl SqliteTypingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TypingStore for SqliteTypingStore {
    async fn set_typing(
        &self,
        room: RoomId,
        user: UserId,
        is_typing: bool,
    ) -> Result<(), RelayError> {
        let now = Utc::now().to_rfc3339();
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO typing_statuses (room_id, user_id, is_typing, last_updated)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(room_id, user_id)
                     DO UPDATE SET is_typing = excluded.is_typing, last_updated = excluded.last_updated",
                    rusqlite::params![room.raw(), user.raw(), is_typing as i64, now],
                )?;
                Ok(())
            })
            .map_err(|e| RelayError::Store(e.to_string()))
    }

    async fn get_typing(&self, room: RoomId, user: UserId) -> bool {
        self.db
            .with_conn(|conn| {
                let flag: Option<i64> = conn
                    .query_row(
                        "SELECT is_typing FROM typing_statuses WHERE room_id = ?1 AND user_id = ?2",
                        rusqlite::params![room.raw(), user.raw()],
                        |row| row.get(0),
                    )
                    .ok();
                Ok(flag.map(|f| f != 0).unwrap_or(false))
            })
            .unwrap_or_else(|e| {
                tracing::warn!(room = %room, user = %user, error = %e, "typing read failed");
                false
            })
    }
}
