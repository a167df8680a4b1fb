use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use ripple_core::auth::{CredentialValidator, IdentityLookup};
use ripple_core::presence::TypingStore;
use ripple_store::notifications::NotificationRepo;

use crate::connection::ConnectionRegistry;
use crate::gateway;
use crate::handlers;
use crate::notify::Notifier;
use crate::router::{self, EventRouter, GroupRouter};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// Bound on credential validation and identity lookup during the
    /// handshake.
    pub auth_timeout: Duration,
    /// Bound on the typing upsert inside message handling.
    pub store_timeout: Duration,
    /// Mid-session credential policy. None keeps the handshake-time
    /// decision for the life of the connection (tokens expiring
    /// mid-session do not force a disconnect); Some(interval)
    /// re-validates on that interval and closes the connection when
    /// validation fails.
    pub credential_recheck: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9400,
            max_send_queue: 256,
            auth_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
            credential_recheck: None,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<GroupRouter>,
    pub validator: Arc<dyn CredentialValidator>,
    pub identity: Arc<dyn IdentityLookup>,
    pub typing: Arc<dyn TypingStore>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    /// Wire the relay together. The router is constructed here and handed
    /// to every collaborator explicitly — there is no ambient singleton,
    /// so independent deployments and tests stay isolated.
    pub fn new(
        config: ServerConfig,
        validator: Arc<dyn CredentialValidator>,
        identity: Arc<dyn IdentityLookup>,
        typing: Arc<dyn TypingStore>,
        notifications: NotificationRepo,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
        let group_router = GroupRouter::new(Arc::clone(&registry));
        let notifier = Arc::new(Notifier::new(
            notifications,
            Arc::clone(&group_router) as Arc<dyn EventRouter>,
        ));

        Self {
            config: Arc::new(config),
            registry,
            router: group_router,
            validator,
            identity,
            typing,
            notifier,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/{room_id}", get(gateway::chat_ws_handler))
        .route("/ws/notifications", get(gateway::notifications_ws_handler))
        .route("/health", get(handlers::health_handler))
        .route("/internal/notify", post(handlers::notify_handler))
        .route(
            "/internal/rooms/{room_id}/typing/{user_id}",
            get(handlers::typing_handler),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the
/// background tasks alive.
pub async fn start(state: AppState) -> Result<ServerHandle, std::io::Error> {
    let cleanup = router::start_cleanup_task(Arc::clone(&state.router), Duration::from_secs(60));

    let port = state.config.port;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "ripple relay started");

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use ripple_core::auth::JwtValidator;
    use ripple_core::ids::{RoomId, UserId};
    use ripple_core::presence::InMemoryTypingStore;
    use ripple_store::notifications::NotificationRepo;
    use ripple_store::users::{SqliteIdentityLookup, UserRepo};
    use ripple_store::Database;

    fn test_state() -> (AppState, Database) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        users.create("alice", None).unwrap(); // id 1
        users.create("bob", Some("user_avatar/peep-2.jpg")).unwrap(); // id 2

        let state = AppState::new(
            ServerConfig {
                port: 0, // random port
                ..Default::default()
            },
            Arc::new(JwtValidator::new("test-secret")),
            Arc::new(SqliteIdentityLookup::new(db.clone())),
            Arc::new(InMemoryTypingStore::new()),
            NotificationRepo::new(db.clone()),
        );
        (state, db)
    }

    #[test]
    fn build_router_creates_routes() {
        let (state, _db) = test_state();
        let _router = build_router(state);
        // If this doesn't panic, the router was built successfully
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (state, _db) = test_state();
        let handle = start(state).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn typing_endpoint_reads_the_store() {
        let (state, _db) = test_state();
        let typing = Arc::clone(&state.typing);
        let handle = start(state).await.unwrap();

        typing
            .set_typing(RoomId::new(7), UserId::new(1), true)
            .await
            .unwrap();

        let url = format!(
            "http://127.0.0.1:{}/internal/rooms/7/typing/1",
            handle.port
        );
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["is_typing"], true);

        // Absent pair reads false, never errors
        let url = format!(
            "http://127.0.0.1:{}/internal/rooms/7/typing/2",
            handle.port
        );
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["is_typing"], false);
    }

    #[tokio::test]
    async fn notify_endpoint_persists_a_record() {
        let (state, db) = test_state();
        let handle = start(state).await.unwrap();

        let url = format!("http://127.0.0.1:{}/internal/notify", handle.port);
        let resp = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({
                "recipient_id": 1,
                "sender_id": 2,
                "kind": "follow"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["notification_type"], "follow");

        let repo = NotificationRepo::new(db);
        assert_eq!(repo.unread_count(UserId::new(1)).unwrap(), 1);
    }

    #[tokio::test]
    async fn notify_endpoint_rejects_unknown_sender() {
        let (state, _db) = test_state();
        let handle = start(state).await.unwrap();

        let url = format!("http://127.0.0.1:{}/internal/notify", handle.port);
        let resp = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({
                "recipient_id": 1,
                "sender_id": 999,
                "kind": "follow"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
