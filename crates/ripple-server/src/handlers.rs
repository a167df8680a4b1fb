//! HTTP boundary for collaborating services: health, the notification
//! trigger, and the typing read path.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use ripple_core::errors::RelayError;
use ripple_core::ids::{PostId, RoomId, UserId};
use ripple_core::wire::NotificationKind;
use ripple_store::notifications::NotificationRecord;

use crate::server::AppState;

/// Health check HTTP endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "connections": state.registry.count(),
    }))
}

/// Body of `POST /internal/notify`, sent by the REST layer on domain
/// events such as "like created".
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub recipient_id: i64,
    pub sender_id: i64,
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<i64>,
}

/// Persist a notification and push it to the recipient's stream.
pub async fn notify_handler(
    State(state): State<AppState>,
    Json(req): Json<NotifyRequest>,
) -> Result<(StatusCode, Json<NotificationRecord>), StatusCode> {
    let sender = state
        .identity
        .get_user(UserId::new(req.sender_id))
        .await
        .map_err(|err| {
            tracing::warn!(sender_id = req.sender_id, error = %err, "notify sender lookup failed");
            match err {
                RelayError::UnknownIdentity(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;

    let record = state
        .notifier
        .notify_user(
            UserId::new(req.recipient_id),
            &sender,
            req.kind,
            req.post_id.map(PostId::new),
        )
        .await
        .map_err(|err| {
            tracing::error!(recipient_id = req.recipient_id, error = %err, "notify failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Serialize)]
pub struct TypingResponse {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Current typing flag for a (room, user) pair. Absent records read as
/// false — this endpoint never errors for missing state.
pub async fn typing_handler(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(i64, i64)>,
) -> Json<TypingResponse> {
    let room = RoomId::new(room_id);
    let user = UserId::new(user_id);
    let is_typing = state.typing.get_typing(room, user).await;
    Json(TypingResponse {
        room_id: room,
        user_id: user,
        is_typing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_request_parses() {
        let req: NotifyRequest = serde_json::from_str(
            r#"{"recipient_id":1,"sender_id":2,"kind":"like","post_id":5}"#,
        )
        .unwrap();
        assert_eq!(req.kind, NotificationKind::Like);
        assert_eq!(req.post_id, Some(5));
    }

    #[test]
    fn notify_request_post_id_is_optional() {
        let req: NotifyRequest =
            serde_json::from_str(r#"{"recipient_id":1,"sender_id":2,"kind":"follow"}"#).unwrap();
        assert_eq!(req.kind, NotificationKind::Follow);
        assert!(req.post_id.is_none());
    }

    #[test]
    fn typing_response_shape() {
        let resp = TypingResponse {
            room_id: RoomId::new(7),
            user_id: UserId::new(3),
            is_typing: true,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["room_id"], 7);
        assert_eq!(json["user_id"], 3);
        assert_eq!(json["is_typing"], true);
    }
}
