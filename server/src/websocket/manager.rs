//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections per tenant along with what each one
//! subscribed to, and fans writes out to the matching connections.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;
use tandem_engine::remote::protocol::{ActiveNumberDoc, RemoteDocument};

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Tenant the connection is scoped to
    pub tenant: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Collections this connection receives snapshots of
    pub collections: HashSet<String>,
    /// Whether this connection receives active number changes
    pub active_number: bool,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Index of connections by tenant.
    by_tenant: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection for `tenant`.
    ///
    /// Returns the connection ID.
    pub fn register(&self, tenant: &str, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                tenant: tenant.to_string(),
                sender,
                collections: HashSet::new(),
                active_number: false,
            },
        );
        self.by_tenant
            .entry(tenant.to_string())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, tenant, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_tenant.get_mut(&conn.tenant) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_tenant.remove(&conn.tenant);
                }
            }

            tracing::info!(conn_id = %conn_id, tenant = %conn.tenant, "WebSocket connection unregistered");
        }
    }

    /// Subscribe a connection to snapshots of `collection`.
    pub fn subscribe(&self, conn_id: &str, collection: &str) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.collections.insert(collection.to_string());
                true
            }
            None => false,
        }
    }

    /// Subscribe a connection to active number changes.
    pub fn subscribe_active_number(&self, conn_id: &str) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.active_number = true;
                true
            }
            None => false,
        }
    }

    /// Push a collection snapshot to the tenant's subscribers.
    ///
    /// Returns the number of connections that received the message.
    pub fn notify_collection(
        &self,
        tenant: &str,
        collection: &str,
        documents: Vec<RemoteDocument>,
    ) -> usize {
        let message = ServerMessage::CollectionChanged {
            collection: collection.to_string(),
            documents,
        };
        let sent = self.send_matching(tenant, &message, |conn| conn.collections.contains(collection));
        tracing::debug!(tenant, collection, recipients = sent, "Pushed collection snapshot");
        sent
    }

    /// Push the active number document to the tenant's subscribers.
    pub fn notify_active_number(&self, doc: &ActiveNumberDoc) -> usize {
        let message = ServerMessage::ActiveNumberChanged { doc: doc.clone() };
        let sent = self.send_matching(&doc.tenant_id, &message, |conn| conn.active_number);
        tracing::debug!(tenant = %doc.tenant_id, recipients = sent, "Pushed active number");
        sent
    }

    fn send_matching<F>(&self, tenant: &str, message: &ServerMessage, wanted: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        // Copy the ids so the tenant index is not locked while sending.
        let conn_ids = match self.by_tenant.get(tenant) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        conn_ids
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|conn| wanted(conn))
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of tenants with at least one connection.
    pub fn tenant_count(&self) -> usize {
        self.by_tenant.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            body: json!({"id": id}),
        }
    }

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("acme", tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.tenant_count(), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.tenant_count(), 0);
        assert!(!manager.subscribe(&conn_id, "cxc"));
    }

    #[test]
    fn test_collection_fan_out_respects_tenant_and_subscription() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let subscribed = manager.register("acme", tx1);
        let _idle = manager.register("acme", tx2);
        let other_tenant = manager.register("globex", tx3);
        manager.subscribe(&subscribed, "cxc");
        manager.subscribe(&other_tenant, "cxc");

        let sent = manager.notify_collection("acme", "cxc", vec![doc("C1")]);
        assert_eq!(sent, 1);

        match rx1.try_recv().unwrap() {
            ServerMessage::CollectionChanged {
                collection,
                documents,
            } => {
                assert_eq!(collection, "cxc");
                assert_eq!(documents, vec![doc("C1")]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_active_number_fan_out() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let listener = manager.register("acme", tx1);
        manager.register("acme", tx2);
        manager.subscribe_active_number(&listener);

        let doc = ActiveNumberDoc {
            number: Some("2500042".into()),
            updated_at: "2025-03-01T10:00:00.000Z".into(),
            updated_by: "u-1".into(),
            tenant_id: "acme".into(),
        };
        assert_eq!(manager.notify_active_number(&doc), 1);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerMessage::ActiveNumberChanged { doc: received } if received == doc
        ));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_closed_receivers_are_not_counted() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = manager.register("acme", tx);
        manager.subscribe(&conn_id, "cxc");
        drop(rx);

        assert_eq!(manager.notify_collection("acme", "cxc", Vec::new()), 0);
        assert!(!manager.send_to(&conn_id, ServerMessage::Pong));
    }
}
