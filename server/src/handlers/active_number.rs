//! Active number handlers.

use crate::db::DocumentStore;
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use tandem_engine::remote::protocol::ActiveNumberDoc;

/// Body of an active number write. Absent fields keep their stored value;
/// an explicit `"number": null` clears the number.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveNumberUpdate {
    #[serde(default, deserialize_with = "present")]
    pub number: Option<Option<String>>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
    pub tenant_id: Option<String>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Current active number document of a tenant.
pub async fn handle_get(store: &dyn DocumentStore, tenant: &str) -> Result<ActiveNumberDoc> {
    store
        .active_number(tenant)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no active number for tenant {tenant}")))
}

/// Merge an update into the tenant's active number and push the result.
pub async fn handle_put(
    store: &dyn DocumentStore,
    conn_manager: &ConnectionManager,
    tenant: &str,
    update: ActiveNumberUpdate,
) -> Result<ActiveNumberDoc> {
    if let Some(found) = update.tenant_id.as_deref().filter(|t| *t != tenant) {
        return Err(AppError::BadRequest(format!(
            "active number belongs to tenant {found}, not {tenant}"
        )));
    }

    let updated_at = match update.updated_at {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| AppError::BadRequest(format!("invalid updatedAt: {e}")))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let existing = store.active_number(tenant).await?;
    let number = match update.number {
        Some(number) => number,
        None => existing.and_then(|doc| doc.number),
    };

    let doc = ActiveNumberDoc {
        number,
        updated_at: updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        updated_by: update.updated_by.unwrap_or_else(|| "anonymous".to_string()),
        tenant_id: tenant.to_string(),
    };
    store.put_active_number(&doc).await?;

    tracing::debug!(tenant, number = ?doc.number, updated_by = %doc.updated_by, "Stored active number");
    conn_manager.notify_active_number(&doc);

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn update(json: &str) -> ActiveNumberUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        assert_eq!(update(r#"{}"#).number, None);
        assert_eq!(update(r#"{"number": null}"#).number, Some(None));
        assert_eq!(
            update(r#"{"number": "2500042"}"#).number,
            Some(Some("2500042".to_string()))
        );
    }

    #[tokio::test]
    async fn test_merge_keeps_number_when_absent() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new();

        handle_put(&store, &manager, "acme", update(r#"{"number": "2500042", "updatedBy": "u-1"}"#))
            .await
            .unwrap();
        let doc = handle_put(&store, &manager, "acme", update(r#"{"updatedBy": "u-2"}"#))
            .await
            .unwrap();
        assert_eq!(doc.number.as_deref(), Some("2500042"));
        assert_eq!(doc.updated_by, "u-2");

        let doc = handle_put(&store, &manager, "acme", update(r#"{"number": null}"#))
            .await
            .unwrap();
        assert_eq!(doc.number, None);
        assert_eq!(doc.updated_by, "anonymous");
    }

    #[tokio::test]
    async fn test_rejects_foreign_tenant_and_bad_timestamp() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new();

        let err = handle_put(&store, &manager, "acme", update(r#"{"tenantId": "globex"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = handle_put(&store, &manager, "acme", update(r#"{"updatedAt": "yesterday"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(matches!(
            handle_get(&store, "acme").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_timestamp_is_normalized() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new();
        let doc = handle_put(
            &store,
            &manager,
            "acme",
            update(r#"{"number": "2500001", "updatedAt": "2025-03-01T10:00:00+02:00"}"#),
        )
        .await
        .unwrap();
        assert_eq!(doc.updated_at, "2025-03-01T08:00:00.000Z");
    }
}
