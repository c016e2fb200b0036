//! Collection handlers - tenant-scoped document reads and writes.

use crate::db::DocumentStore;
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;
use serde_json::Value;
use tandem_engine::remote::protocol::{CollectionResponse, RemoteDocument};

/// List every document of a tenant's collection.
pub async fn handle_list(
    store: &dyn DocumentStore,
    tenant: &str,
    collection: &str,
) -> Result<CollectionResponse> {
    let documents = store.list(tenant, collection).await?;
    Ok(CollectionResponse { documents })
}

/// Store one document and push the new collection snapshot to subscribers.
///
/// The body is stamped with the path tenant. A body already carrying a
/// different `tenantId` is rejected.
pub async fn handle_put(
    store: &dyn DocumentStore,
    conn_manager: &ConnectionManager,
    tenant: &str,
    collection: &str,
    doc_id: &str,
    body: Value,
) -> Result<RemoteDocument> {
    let body = stamp_tenant(tenant, body)?;
    store.put(tenant, collection, doc_id, &body).await?;

    tracing::debug!(tenant, collection, doc_id, "Stored document");

    let snapshot = store.list(tenant, collection).await?;
    conn_manager.notify_collection(tenant, collection, snapshot);

    Ok(RemoteDocument {
        id: doc_id.to_string(),
        body,
    })
}

fn stamp_tenant(tenant: &str, mut body: Value) -> Result<Value> {
    let Value::Object(map) = &mut body else {
        return Err(AppError::BadRequest("document body must be a JSON object".into()));
    };

    match map.get("tenantId") {
        None | Some(Value::Null) => {
            map.insert("tenantId".into(), Value::String(tenant.to_string()));
        }
        Some(Value::String(found)) if found == tenant => {}
        Some(Value::String(found)) => {
            tracing::warn!(tenant, found = %found, "Rejected document of another tenant");
            return Err(AppError::BadRequest(format!(
                "document belongs to tenant {found}, not {tenant}"
            )));
        }
        Some(_) => return Err(AppError::BadRequest("tenantId must be a string".into())),
    }

    Ok(body)
}
