//! Wire types shared by the remote store client and the document server.
//!
//! REST bodies use camelCase; WebSocket messages are tagged with a
//! snake_case `type` field.

use crate::TenantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document as exchanged over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Document key inside its collection
    pub id: String,
    pub body: Value,
}

/// Response of a collection listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub documents: Vec<RemoteDocument>,
}

/// The per-tenant active registration number document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveNumberDoc {
    /// `None` once an operator cleared it
    pub number: Option<String>,
    /// ISO-8601
    pub updated_at: String,
    /// User id or `"anonymous"`
    pub updated_by: String,
    pub tenant_id: TenantId,
}

/// Profile document mapping a user to its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub tenant_id: Option<TenantId>,
}

/// Messages sent from client to server on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Receive a snapshot of `collection` whenever it changes.
    Subscribe { collection: String },
    /// Receive the active number document whenever it changes.
    SubscribeActiveNumber,
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full tenant-scoped snapshot of a collection after a change.
    CollectionChanged {
        collection: String,
        documents: Vec<RemoteDocument>,
    },
    /// The active number document after a change.
    ActiveNumberChanged { doc: ActiveNumberDoc },
    /// Response to ping.
    Pong,
    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
