//! WebSocket handler for realtime pushes.
//!
//! Handles WebSocket connections, records subscriptions with the
//! connection manager and answers each subscription with the current state.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::db::DocumentStore;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection for `tenant`.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    store: Arc<dyn DocumentStore>,
    conn_manager: Arc<ConnectionManager>,
    tenant: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(&tenant, tx);

    tracing::info!(conn_id = %conn_id, tenant = %tenant, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) =
                    process_message(text.as_str(), store.as_ref(), &conn_manager, &conn_id, &tenant)
                        .await
                {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        tenant = %tenant,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the immediate response, if any.
///
/// Subscriptions are answered with the current snapshot so a listener
/// starts from the stored state.
pub async fn process_message(
    text: &str,
    store: &dyn DocumentStore,
    conn_manager: &ConnectionManager,
    conn_id: &str,
    tenant: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(format!("Invalid message format: {}", e)));
        }
    };

    match client_msg {
        ClientMessage::Subscribe { collection } => {
            conn_manager.subscribe(conn_id, &collection);
            match store.list(tenant, &collection).await {
                Ok(documents) => Some(ServerMessage::CollectionChanged {
                    collection,
                    documents,
                }),
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        ClientMessage::SubscribeActiveNumber => {
            conn_manager.subscribe_active_number(conn_id);
            match store.active_number(tenant).await {
                Ok(doc) => doc.map(|doc| ServerMessage::ActiveNumberChanged { doc }),
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}
