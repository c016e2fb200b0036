//! In-process document store.

use super::DocumentStore;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tandem_engine::remote::protocol::{ActiveNumberDoc, RemoteDocument};

/// Document store held in memory; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: DashMap<(String, String), BTreeMap<String, Value>>,
    active_numbers: DashMap<String, ActiveNumberDoc>,
    profiles: DashMap<String, Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>> {
        let key = (tenant.to_string(), collection.to_string());
        Ok(self
            .documents
            .get(&key)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| RemoteDocument {
                        id: id.clone(),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put(&self, tenant: &str, collection: &str, doc_id: &str, body: &Value) -> Result<()> {
        self.documents
            .entry((tenant.to_string(), collection.to_string()))
            .or_default()
            .insert(doc_id.to_string(), body.clone());
        Ok(())
    }

    async fn active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>> {
        Ok(self.active_numbers.get(tenant).map(|doc| doc.clone()))
    }

    async fn put_active_number(&self, doc: &ActiveNumberDoc) -> Result<()> {
        self.active_numbers.insert(doc.tenant_id.clone(), doc.clone());
        Ok(())
    }

    async fn user_tenant(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.profiles.get(user_id).and_then(|tenant| tenant.clone()))
    }

    async fn put_user_tenant(&self, user_id: &str, tenant: Option<&str>) -> Result<()> {
        self.profiles
            .insert(user_id.to_string(), tenant.map(str::to_string));
        Ok(())
    }
}
