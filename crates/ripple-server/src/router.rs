use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use ripple_core::ids::ConnectionId;
use ripple_core::wire::RelayEvent;

use crate::connection::{Connection, ConnectionRegistry, SendOutcome};

/// Instance-agnostic publish seam. The local delivery loop below and a
/// cross-instance transport are two implementations of the same contract:
/// deliver the event to every current subscriber of the group.
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Returns the number of subscribers the event was queued for.
    /// Publishing to a group with no subscribers is a silent no-op.
    async fn publish(&self, group: &str, event: &RelayEvent) -> usize;
}

type GroupTable = DashMap<String, HashSet<ConnectionId>>;

/// In-process group broadcast router. Groups are created implicitly on
/// first subscribe and dropped when their last member leaves.
pub struct GroupRouter {
    registry: Arc<ConnectionRegistry>,
    groups: Arc<GroupTable>,
}

impl GroupRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            groups: Arc::new(DashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Add a connection to a group. Idempotent.
    pub fn subscribe(&self, conn: &Arc<Connection>, group: &str) {
        let newly = conn.groups.lock().insert(group.to_string());
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(conn.id.clone());
        if newly {
            tracing::debug!(connection_id = %conn.id, group, "subscribed");
        }
    }

    /// Remove a connection from a group. Idempotent; never errors.
    pub fn unsubscribe(&self, conn_id: &ConnectionId, group: &str) {
        if let Some(conn) = self.registry.get(conn_id) {
            conn.groups.lock().remove(group);
        }
        remove_membership(&self.groups, group, conn_id);
    }

    /// Remove a connection from every group it is subscribed to,
    /// leaving the connection itself registered. Idempotent.
    pub fn unsubscribe_all(&self, conn_id: &ConnectionId) {
        if let Some(conn) = self.registry.get(conn_id) {
            release_groups(&self.groups, &conn);
        }
    }

    /// Tear down a connection: drop every group membership, then remove it
    /// from the registry. Safe to call more than once.
    pub fn drop_connection(&self, conn_id: &ConnectionId) {
        if let Some(conn) = self.registry.unregister(conn_id) {
            release_groups(&self.groups, &conn);
            tracing::info!(connection_id = %conn_id, user = %conn.user.id, "connection dropped");
        }
    }

    /// Current subscriber count for a group.
    pub fn subscriber_count(&self, group: &str) -> usize {
        self.groups.get(group).map(|members| members.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventRouter for GroupRouter {
    async fn publish(&self, group: &str, event: &RelayEvent) -> usize {
        // Snapshot the membership so the group lock is not held across sends.
        let members: Vec<ConnectionId> = match self.groups.get(group) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };

        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(group, error = %e, "event serialization failed");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn_id in members {
            match self.registry.try_send(&conn_id, json.clone()) {
                SendOutcome::Sent => delivered += 1,
                SendOutcome::QueueFull => {
                    // Backpressure on one subscriber never blocks the rest.
                }
                SendOutcome::Closed | SendOutcome::Unknown => {
                    // Dead subscriber: tear it down off the publish path so
                    // one bad connection cannot poison the broadcast.
                    let registry = Arc::clone(&self.registry);
                    let groups = Arc::clone(&self.groups);
                    tokio::spawn(async move {
                        if let Some(conn) = registry.unregister(&conn_id) {
                            release_groups(&groups, &conn);
                            tracing::info!(
                                connection_id = %conn_id,
                                "dead subscriber dropped during publish"
                            );
                        }
                    });
                }
            }
        }
        delivered
    }
}

/// Remove one connection from one group, dropping the group if it empties.
fn remove_membership(groups: &GroupTable, group: &str, conn_id: &ConnectionId) {
    if let Some(mut members) = groups.get_mut(group) {
        members.remove(conn_id);
    }
    groups.remove_if(group, |_, members| members.is_empty());
}

/// Drain every group membership a connection holds.
fn release_groups(groups: &GroupTable, conn: &Connection) {
    let held: Vec<String> = conn.groups.lock().drain().collect();
    for group in held {
        remove_membership(groups, &group, &conn.id);
    }
}

/// Periodically drop connections that stopped answering pings.
pub fn start_cleanup_task(
    router: Arc<GroupRouter>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick
        loop {
            ticker.tick().await;
            let stale = router.registry().stale_connections();
            let removed = stale.len();
            for conn_id in stale {
                router.drop_connection(&conn_id);
            }
            if removed > 0 {
                tracing::info!(removed, "stale connection cleanup");
            }
        }
    })
}
