use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::{NotificationId, PostId, RoomId, UserId};

/// Broadcast group for a chat room.
pub fn chat_group(room_id: RoomId) -> String {
    format!("chat_{room_id}")
}

/// Broadcast group for a user's notification stream.
pub fn notifications_group(user_id: UserId) -> String {
    format!("user_{user_id}_notifications")
}

/// Inbound frame on a chat connection. Clients may omit either field.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatFrame {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_typing: bool,
}

/// Outbound chat broadcast, fanned out to every room subscriber
/// including the sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatBroadcast {
    pub message: String,
    pub is_typing: bool,
    pub sender: String,
}

/// Notification kinds emitted by domain events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Like => write!(f, "like"),
            Self::Comment => write!(f, "comment"),
            Self::Follow => write!(f, "follow"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "comment" => Ok(Self::Comment),
            "follow" => Ok(Self::Follow),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// Sender identity embedded in a notification push.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderRef {
    pub username: String,
    pub profile_pic: Option<String>,
}

/// Outbound notification push. `created_at` is ISO-8601.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPush {
    pub id: NotificationId,
    pub notification_type: NotificationKind,
    pub sender: SenderRef,
    pub post: Option<PostId>,
    pub created_at: String,
}

/// An event fanned out to a group. Serializes to the bare payload —
/// subscribers see exactly the chat or notification shape, no envelope.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Chat(ChatBroadcast),
    Notification(NotificationPush),
}

/// Error acknowledgement sent back on the offending connection only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorAck {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorAck {
    pub fn from_error(err: &RelayError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.error_kind().to_uppercase(),
                message: err.to_string(),
            },
        }
    }
}
