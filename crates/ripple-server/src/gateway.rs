use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use ripple_core::auth::UserSummary;
use ripple_core::errors::RelayError;
use ripple_core::ids::RoomId;
use ripple_core::wire::{chat_group, notifications_group, ChatBroadcast, ChatFrame, ErrorAck, RelayEvent};

use crate::connection::{Connection, HEARTBEAT_INTERVAL};
use crate::router::EventRouter;
use crate::server::AppState;

/// Handshake query parameters. The bearer credential rides the
/// connection URL; there is no header-based alternative.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// Which stream a connection is attached to.
#[derive(Clone, Copy, Debug)]
enum StreamKind {
    Chat(RoomId),
    Notifications,
}

/// WebSocket upgrade for a chat room: `GET /ws/chat/{room_id}?token=...`
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<i64>,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = match authenticate(&state, query.token.as_deref()).await {
        Ok(user) => user,
        Err(err) => return Err(reject(err)),
    };
    let token = query.token.unwrap_or_default();
    let room = RoomId::new(room_id);
    Ok(ws.on_upgrade(move |socket| {
        run_connection(socket, state, user, token, StreamKind::Chat(room))
    }))
}

/// WebSocket upgrade for a user's notification stream:
/// `GET /ws/notifications?token=...`
pub async fn notifications_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = match authenticate(&state, query.token.as_deref()).await {
        Ok(user) => user,
        Err(err) => return Err(reject(err)),
    };
    let token = query.token.unwrap_or_default();
    Ok(ws.on_upgrade(move |socket| {
        run_connection(socket, state, user, token, StreamKind::Notifications)
    }))
}

/// Validate the bearer credential and resolve its identity, each bounded
/// by the auth timeout. Authentication happens once at handshake; see
/// `ServerConfig::credential_recheck` for the mid-session policy.
pub(crate) async fn authenticate(
    state: &AppState,
    token: Option<&str>,
) -> Result<UserSummary, RelayError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(RelayError::MissingCredential)?;

    let user_id = tokio::time::timeout(state.config.auth_timeout, state.validator.validate(token))
        .await
        .map_err(|_| RelayError::DependencyTimeout {
            dependency: "credential validator",
        })??;

    let user = tokio::time::timeout(state.config.auth_timeout, state.identity.get_user(user_id))
        .await
        .map_err(|_| RelayError::DependencyTimeout {
            dependency: "identity lookup",
        })??;

    Ok(user)
}

/// Map a handshake failure to the upgrade response. Rejecting the upgrade
/// closes the transport without creating a Connection.
fn reject(err: RelayError) -> StatusCode {
    tracing::warn!(kind = err.error_kind(), error = %err, "handshake rejected");
    if err.is_terminal() {
        StatusCode::UNAUTHORIZED
    } else if matches!(err, RelayError::DependencyTimeout { .. }) {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Drive one authenticated connection until either side closes.
async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user: UserSummary,
    token: String,
    kind: StreamKind,
) {
    let (conn, mut rx) = state.registry.register(user);
    let group = match kind {
        StreamKind::Chat(room) => chat_group(room),
        StreamKind::Notifications => notifications_group(conn.user.id),
    };
    state.router.subscribe(&conn, &group);
    tracing::info!(
        connection_id = %conn.id,
        user = %conn.user.id,
        group = %group,
        "connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: outbound queue -> socket, heartbeat pings, and the optional
    // credential re-check policy.
    let writer_conn = Arc::clone(&conn);
    let writer_validator = Arc::clone(&state.validator);
    let recheck = state.config.credential_recheck;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick
        let mut recheck_interval = recheck.map(|every| {
            tokio::time::interval_at(tokio::time::Instant::now() + every, every)
        });

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                _ = recheck_due(&mut recheck_interval) => {
                    if writer_validator.validate(&token).await.is_err() {
                        tracing::info!(
                            connection_id = %writer_conn.id,
                            "credential no longer valid, closing connection"
                        );
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }

        writer_conn.mark_disconnected();
    });

    // Reader: socket -> sequential message handling. Awaiting each frame
    // inline keeps per-connection handling strictly ordered.
    let reader_conn = Arc::clone(&conn);
    let reader_state = state.clone();
    let reader_group = group.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => match kind {
                    StreamKind::Chat(room) => {
                        handle_chat_frame(
                            &reader_state,
                            &reader_conn,
                            room,
                            &reader_group,
                            text.as_str(),
                        )
                        .await;
                    }
                    StreamKind::Notifications => {
                        tracing::debug!(
                            connection_id = %reader_conn.id,
                            "ignoring inbound frame on notification stream"
                        );
                    }
                },
                WsMessage::Pong(_) => reader_conn.record_pong(),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies automatically
                _ => {}
            }
        }
    });

    // Either side finishing tears the whole connection down. The reason
    // is informational only — reconnection is a fresh handshake.
    let reason = tokio::select! {
        _ = &mut writer => { reader.abort(); "write side closed" }
        _ = &mut reader => { writer.abort(); "peer disconnected" }
    };
    tracing::info!(connection_id = %conn.id, reason, "connection closed");

    state.router.drop_connection(&conn.id);
}

/// Decode one inbound chat frame, upsert the typing flag, then fan the
/// message out. Any failure is reported to the sender only; the
/// connection stays open.
async fn handle_chat_frame(
    state: &AppState,
    conn: &Arc<Connection>,
    room: RoomId,
    group: &str,
    text: &str,
) {
    let frame: ChatFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let err = RelayError::Decode(e.to_string());
            tracing::warn!(connection_id = %conn.id, error = %err, "inbound frame rejected");
            send_ack(state, conn, &err);
            return;
        }
    };

    // The typing flag lands before the publish so a reader opening the
    // room never sees the message without the flag that carried it.
    let upsert = tokio::time::timeout(
        state.config.store_timeout,
        state.typing.set_typing(room, conn.user.id, frame.is_typing),
    )
    .await;
    match upsert {
        Err(_) => {
            let err = RelayError::DependencyTimeout {
                dependency: "typing store",
            };
            tracing::warn!(connection_id = %conn.id, error = %err, "typing upsert timed out");
            send_ack(state, conn, &err);
            return;
        }
        Ok(Err(err)) => {
            tracing::warn!(connection_id = %conn.id, error = %err, "typing upsert failed");
            send_ack(state, conn, &err);
            return;
        }
        Ok(Ok(())) => {}
    }

    let event = RelayEvent::Chat(ChatBroadcast {
        message: frame.message,
        is_typing: frame.is_typing,
        sender: conn.user.username.clone(),
    });
    let delivered = state.router.publish(group, &event).await;
    tracing::debug!(connection_id = %conn.id, group, delivered, "chat frame relayed");
}

/// Queue an error acknowledgement back on the offending connection only.
fn send_ack(state: &AppState, conn: &Connection, err: &RelayError) {
    let ack = ErrorAck::from_error(err);
    if let Ok(json) = serde_json::to_string(&ack) {
        let _ = state.registry.try_send(&conn.id, json);
    }
}

async fn recheck_due(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
