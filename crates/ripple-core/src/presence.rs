use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::errors::RelayError;
use crate::ids::{RoomId, UserId};

/// One typing flag per (room, user) pair.
#[derive(Clone, Copy, Debug)]
pub struct TypingState {
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

/// Mutable presence state written by the gateway and read back by the
/// REST collaborator. Last write wins per (room, user); reads never error.
#[async_trait]
pub trait TypingStore: Send + Sync {
    async fn set_typing(
        &self,
        room: RoomId,
        user: UserId,
        is_typing: bool,
    ) -> Result<(), RelayError>;

    /// Returns false when no record exists.
    async fn get_typing(&self, room: RoomId, user: UserId) -> bool;
}

/// Default single-process implementation. Each (room, user) pair owns its
/// own entry, so concurrent writers for different users never contend on
/// a shared row.
#[derive(Default)]
pub struct InMemoryTypingStore {
    rows: DashMap<(RoomId, UserId), TypingState>,
}

impl InMemoryTypingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, room: RoomId, user: UserId) -> Option<TypingState> {
        self.rows.get(&(room, user)).map(|entry| *entry.value())
    }
}

#[async_trait]
impl TypingStore for InMemoryTypingStore {
    async fn set_typing(
        &self,
        room: RoomId,
        user: UserId,
        is_typing: bool,
    ) -> Result<(), RelayError> {
        self.rows.insert(
            (room, user),
            TypingState {
                is_typing,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_typing(&self, room: RoomId, user: UserId) -> bool {
        self.rows
            .get(&(room, user))
            .map(|entry| entry.is_typing)
            .unwrap_or(false)
    }
}
