use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ripple_core::auth::UserSummary;
use ripple_core::ids::ConnectionId;

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A live, authenticated real-time session. Created only after the
/// handshake credential has been validated; destroyed on disconnect.
pub struct Connection {
    pub id: ConnectionId,
    pub user: UserSummary,
    tx: mpsc::Sender<String>,
    /// Groups this connection is currently subscribed to. Mutated only
    /// through the router, drained on disconnect.
    pub(crate) groups: Mutex<HashSet<String>>,
    connected: AtomicBool,
    pub(crate) last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, user: UserSummary, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user,
            tx,
            groups: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }

    pub fn subscribed_groups(&self) -> Vec<String> {
        self.groups.lock().iter().cloned().collect()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Outcome of a non-blocking delivery attempt to one connection.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Backpressure: the outbound queue is full. The event is dropped.
    QueueFull,
    /// The connection's receive side is gone; the connection is dead.
    Closed,
    /// No such connection registered.
    Unknown,
}

/// Registry of all live connections on this instance.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new authenticated connection. Returns the connection and
    /// the receive side of its outbound queue.
    pub fn register(&self, user: UserSummary) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection::new(id.clone(), user, tx));
        self.connections.insert(id, Arc::clone(&conn));
        (conn, rx)
    }

    /// Remove a connection. Returns it so the caller can release its
    /// group memberships.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, conn) = self.connections.remove(id)?;
        conn.mark_disconnected();
        Some(conn)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Queue a message for one connection without blocking.
    pub fn try_send(&self, id: &ConnectionId, message: String) -> SendOutcome {
        let Some(conn) = self.connections.get(id) else {
            return SendOutcome::Unknown;
        };
        match conn.tx.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                SendOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that stopped answering pings within the timeout.
    pub fn stale_connections(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::ids::UserId;

    fn test_user(id: i64, username: &str) -> UserSummary {
        UserSummary {
            id: UserId::new(id),
            username: username.to_string(),
            profile_pic: None,
        }
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (conn1, _rx1) = registry.register(test_user(1, "alice"));
        let (conn2, _rx2) = registry.register(test_user(2, "bob"));
        assert_eq!(registry.count(), 2);
        assert_ne!(conn1.id, conn2.id);

        let removed = registry.unregister(&conn1.id).unwrap();
        assert!(!removed.is_connected());
        assert_eq!(registry.count(), 1);

        // Second unregister is a no-op
        assert!(registry.unregister(&conn1.id).is_none());
    }

    #[tokio::test]
    async fn try_send_delivers() {
        let registry = ConnectionRegistry::new(32);
        let (conn, mut rx) = registry.register(test_user(1, "alice"));

        assert_eq!(registry.try_send(&conn.id, "hello".into()), SendOutcome::Sent);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn try_send_unknown_connection() {
        let registry = ConnectionRegistry::new(32);
        let id = ConnectionId::new();
        assert_eq!(registry.try_send(&id, "hello".into()), SendOutcome::Unknown);
    }

    #[test]
    fn try_send_full_queue_drops() {
        let registry = ConnectionRegistry::new(2);
        let (conn, _rx) = registry.register(test_user(1, "alice"));

        assert_eq!(registry.try_send(&conn.id, "one".into()), SendOutcome::Sent);
        assert_eq!(registry.try_send(&conn.id, "two".into()), SendOutcome::Sent);
        assert_eq!(
            registry.try_send(&conn.id, "three".into()),
            SendOutcome::QueueFull
        );
    }

    #[test]
    fn try_send_closed_receiver() {
        let registry = ConnectionRegistry::new(32);
        let (conn, rx) = registry.register(test_user(1, "alice"));
        drop(rx);
        assert_eq!(registry.try_send(&conn.id, "hello".into()), SendOutcome::Closed);
    }

    #[test]
    fn pong_tracking() {
        let registry = ConnectionRegistry::new(32);
        let (conn, _rx) = registry.register(test_user(1, "alice"));
        assert!(conn.is_alive());
        conn.record_pong();
        assert!(conn.is_alive());
        assert!(registry.stale_connections().is_empty());
    }

    #[test]
    fn stale_connections_detected() {
        let registry = ConnectionRegistry::new(32);
        let (conn, _rx) = registry.register(test_user(1, "alice"));

        conn.last_pong.store(0, Ordering::Relaxed);
        let stale = registry.stale_connections();
        assert_eq!(stale, vec![conn.id.clone()]);
    }
}
