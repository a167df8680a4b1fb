use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ripple_core::ids::{NotificationId, PostId, UserId};
use ripple_core::wire::NotificationKind;

use crate::database::Database;
use crate::error::StoreError;

/// A durable notification record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub sender_id: UserId,
    pub notification_type: NotificationKind,
    pub post_id: Option<PostId>,
    pub is_read: bool,
    pub created_at: String,
}

pub struct NotificationRepo {
    db: Database,
}

impl NotificationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a notification record.
    #[instrument(skip(self), fields(recipient = %recipient, kind = %kind))]
    pub fn create(
        &self,
        recipient: UserId,
        sender: UserId,
        kind: NotificationKind,
        post: Option<PostId>,
    ) -> Result<NotificationRecord, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (recipient_id, sender_id, notification_type, post_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![
                    recipient.raw(),
                    sender.raw(),
                    kind.to_string(),
                    post.map(|p| p.raw()),
                    now
                ],
            )?;

            Ok(NotificationRecord {
                id: NotificationId::new(conn.last_insert_rowid()),
                recipient_id: recipient,
                sender_id: sender,
                notification_type: kind,
                post_id: post,
                is_read: false,
                created_at: now.clone(),
            })
        })
    }

    /// All notifications for a recipient, newest first.
    #[instrument(skip(self), fields(recipient = %recipient))]
    pub fn list_for(&self, recipient: UserId) -> Result<Vec<NotificationRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, sender_id, notification_type, post_id, is_read, created_at
                 FROM notifications WHERE recipient_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([recipient.raw()], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark one of the recipient's notifications as read.
    #[instrument(skip(self), fields(id = %id, recipient = %recipient))]
    pub fn mark_read(
        &self,
        id: NotificationId,
        recipient: UserId,
    ) -> Result<NotificationRecord, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![id.raw(), recipient.raw()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("notification {id}")));
            }

            conn.query_row(
                "SELECT id, recipient_id, sender_id, notification_type, post_id, is_read, created_at
                 FROM notifications WHERE id = ?1",
                [id.raw()],
                row_to_record,
            )
            .map_err(Into::into)
        })
    }

    /// Mark every unread notification for the recipient as read.
    /// Returns the number of rows updated.
    #[instrument(skip(self), fields(recipient = %recipient))]
    pub fn mark_all_read(&self, recipient: UserId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
                [recipient.raw()],
            )
            .map_err(Into::into)
        })
    }

    /// Count of unread notifications for the recipient.
    pub fn unread_count(&self, recipient: UserId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
                [recipient.raw()],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    /// Explicit cascade: remove every notification addressed to a recipient.
    #[instrument(skip(self), fields(recipient = %recipient))]
    pub fn delete_for_recipient(&self, recipient: UserId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM notifications WHERE recipient_id = ?1",
                [recipient.raw()],
            )
            .map_err(Into::into)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<NotificationRecord, rusqlite::Error> {
    let kind: String = row.get(3)?;
    Ok(NotificationRecord {
        id: NotificationId::new(row.get(0)?),
        recipient_id: UserId::new(row.get(1)?),
        sender_id: UserId::new(row.get(2)?),
        notification_type: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        post_id: row.get::<_, Option<i64>>(4)?.map(PostId::new),
        is_read: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}
