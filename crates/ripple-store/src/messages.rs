use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ripple_core::ids::{RoomId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// A durable chat message. The relay itself never writes these; the REST
/// collaborator appends through this repo before or alongside publishing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: String,
    pub is_delivered: bool,
    pub is_seen: bool,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to a room's history.
    #[instrument(skip(self, content), fields(room = %room, sender = %sender))]
    pub fn append(
        &self,
        room: RoomId,
        sender: UserId,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (room_id, sender_id, content, timestamp, is_delivered, is_seen)
                 VALUES (?1, ?2, ?3, ?4, 1, 0)",
                rusqlite::params![room.raw(), sender.raw(), content, now],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                room_id: room,
                sender_id: sender,
                content: content.to_string(),
                timestamp: now.clone(),
                is_delivered: true,
                is_seen: false,
            })
        })
    }

    /// A room's history in chronological order.
    #[instrument(skip(self), fields(room = %room))]
    pub fn history(&self, room: RoomId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, sender_id, content, timestamp, is_delivered, is_seen
                 FROM messages WHERE room_id = ?1 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([room.raw()], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark everything the reader did not send as seen.
    /// Returns the number of rows updated.
    #[instrument(skip(self), fields(room = %room, reader = %reader))]
    pub fn mark_seen(&self, room: RoomId, reader: UserId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET is_seen = 1
                 WHERE room_id = ?1 AND sender_id != ?2 AND is_seen = 0",
                rusqlite::params![room.raw(), reader.raw()],
            )
            .map_err(Into::into)
        })
    }

    /// The most recent message in a room, if any.
    pub fn last_message(&self, room: RoomId) -> Result<Option<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, room_id, sender_id, content, timestamp, is_delivered, is_seen
                 FROM messages WHERE room_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                [room.raw()],
                row_to_message,
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Explicit cascade: remove a room's entire history.
    #[instrument(skip(self), fields(room = %room))]
    pub fn delete_for_room(&self, room: RoomId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE room_id = ?1", [room.raw()])
                .map_err(Into::into)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: RoomId::new(row.get(1)?),
        sender_id: UserId::new(row.get(2)?),
        content: row.get(3)?,
        timestamp: row.get(4)?,
        is_delivered: row.get::<_, i64>(5)? != 0,
        is_seen: row.get::<_, i64>(6)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (Database, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let alice = users.create("alice", None).unwrap();
        let bob = users.create("bob", None).unwrap();
        (db, alice.id, bob.id)
    }

    #[test]
    fn append_and_history_chronological() {
        let (db, alice, bob) = setup();
        let repo = MessageRepo::new(db);
        let room = RoomId::new(1);

        repo.append(room, alice, "hi").unwrap();
        repo.append(room, bob, "hey").unwrap();

        let history = repo.history(room).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hey");
        assert!(history[0].is_delivered);
        assert!(!history[0].is_seen);
    }

    #[test]
    fn mark_seen_skips_own_messages() {
        let (db, alice, bob) = setup();
        let repo = MessageRepo::new(db);
        let room = RoomId::new(1);

        repo.append(room, alice, "one").unwrap();
        repo.append(room, bob, "two").unwrap();

        // alice opens the room: only bob's message flips
        assert_eq!(repo.mark_seen(room, alice).unwrap(), 1);
        let history = repo.history(room).unwrap();
        assert!(!history[0].is_seen);
        assert!(history[1].is_seen);
    }

    #[test]
    fn last_message() {
        let (db, alice, _bob) = setup();
        let repo = MessageRepo::new(db);
        let room = RoomId::new(1);

        assert!(repo.last_message(room).unwrap().is_none());

        repo.append(room, alice, "first").unwrap();
        repo.append(room, alice, "second").unwrap();
        assert_eq!(repo.last_message(room).unwrap().unwrap().content, "second");
    }

    #[test]
    fn histories_are_per_room() {
        let (db, alice, _bob) = setup();
        let repo = MessageRepo::new(db);

        repo.append(RoomId::new(1), alice, "in room 1").unwrap();
        assert!(repo.history(RoomId::new(2)).unwrap().is_empty());
    }

    #[test]
    fn delete_for_room() {
        let (db, alice, _bob) = setup();
        let repo = MessageRepo::new(db);
        let room = RoomId::new(1);

        repo.append(room, alice, "gone soon").unwrap();
        assert_eq!(repo.delete_for_room(room).unwrap(), 1);
        assert!(repo.history(room).unwrap().is_empty());
    }
}
