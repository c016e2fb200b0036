//! User profile handlers.

use crate::db::DocumentStore;
use crate::error::{AppError, Result};
use serde::Deserialize;
use tandem_engine::remote::protocol::UserProfile;

/// Body of a profile write.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub tenant_id: Option<String>,
}

/// Profile of a user that has a tenant on record.
pub async fn handle_get(store: &dyn DocumentStore, user_id: &str) -> Result<UserProfile> {
    match store.user_tenant(user_id).await? {
        Some(tenant) => Ok(UserProfile {
            user_id: user_id.to_string(),
            tenant_id: Some(tenant),
        }),
        None => Err(AppError::NotFound(format!("no tenant for user {user_id}"))),
    }
}

/// Record the tenant of a user; an empty or missing tenant clears it.
pub async fn handle_put(
    store: &dyn DocumentStore,
    user_id: &str,
    update: ProfileUpdate,
) -> Result<UserProfile> {
    let tenant_id = update.tenant_id.filter(|t| !t.trim().is_empty());
    store.put_user_tenant(user_id, tenant_id.as_deref()).await?;
    tracing::debug!(user_id, tenant = ?tenant_id, "Stored user profile");
    Ok(UserProfile {
        user_id: user_id.to_string(),
        tenant_id,
    })
}
