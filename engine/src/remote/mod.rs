//! Remote store: the authoritative multi-tenant document store.
//!
//! [`RemoteStore`] is the raw backend seam (tenant passed explicitly, plain
//! documents). [`RemoteAdapter`] sits on top of it, resolves the tenant for
//! every call, converts documents into [`Record`]s and refuses anything
//! outside the resolved tenant's scope.

mod http;
mod memory;
pub mod protocol;

pub use http::HttpRemote;
pub use memory::MemoryRemote;
pub use protocol::{ActiveNumberDoc, RemoteDocument};

use crate::module::Module;
use crate::readiness::Readiness;
use crate::record::Record;
use crate::tenant::TenantResolver;
use crate::{Error, Result, TenantId};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Typed stream of pushes from the remote store. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Subscription fed directly by the store.
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, task: None }
    }

    /// Subscription fed by a background task, aborted on drop.
    pub fn with_task(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wait for the next push. Returns `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a push if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Raw access to a multi-tenant document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All documents of a tenant's collection.
    async fn get_all(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>>;

    /// Create or replace one document.
    async fn upsert(&self, tenant: &str, collection: &str, doc_id: &str, body: &Value)
        -> Result<()>;

    /// Snapshots of a tenant's collection, pushed after every change.
    async fn subscribe(
        &self,
        tenant: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<RemoteDocument>>>;

    async fn get_active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>>;

    async fn set_active_number(&self, tenant: &str, doc: &ActiveNumberDoc) -> Result<()>;

    async fn subscribe_active_number(&self, tenant: &str)
        -> Result<Subscription<ActiveNumberDoc>>;

    /// Tenant recorded on a user's profile document.
    async fn user_tenant(&self, user_id: &str) -> Result<Option<TenantId>>;

    /// Connectivity probe.
    fn is_online(&self) -> bool;

    /// Whether the backend has finished initializing.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Tenant-scoped, module-aware view of a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteAdapter {
    store: Arc<dyn RemoteStore>,
    tenants: Arc<TenantResolver>,
    readiness: Readiness,
}

impl RemoteAdapter {
    pub fn new(store: Arc<dyn RemoteStore>, tenants: Arc<TenantResolver>, readiness: Readiness) -> Self {
        Self {
            store,
            tenants,
            readiness,
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn tenants(&self) -> &Arc<TenantResolver> {
        &self.tenants
    }

    /// Connectivity probe.
    pub fn is_online(&self) -> bool {
        self.store.is_online()
    }

    /// Wait for the backend to become ready, within the readiness budget.
    pub async fn ensure_ready(&self) -> Result<()> {
        let store = &self.store;
        if self
            .readiness
            .wait_until(move || async move { store.is_ready() })
            .await
        {
            Ok(())
        } else {
            Err(Error::NotReady {
                attempts: self.readiness.attempts,
            })
        }
    }

    /// All records of a module within the resolved tenant.
    pub async fn get_all(&self, module: Module) -> Result<Vec<Record>> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let documents = self.store.get_all(&tenant, module.as_str()).await?;
        Ok(scope_documents(module, &tenant, documents))
    }

    /// Write a record to the resolved tenant's collection.
    ///
    /// The body is stamped with the tenant; a body already scoped to another
    /// tenant is rejected.
    pub async fn upsert(&self, module: Module, id: &str, body: &Value) -> Result<()> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let body = stamp_tenant(&tenant, body)?;
        let doc_id = module.remote_doc_id(id, &body);
        self.store
            .upsert(&tenant, module.as_str(), &doc_id, &body)
            .await?;
        tracing::debug!(module = %module, id, tenant = %tenant, "Upserted remote record");
        Ok(())
    }

    /// Tenant-scoped record snapshots pushed whenever the collection changes.
    pub async fn subscribe(&self, module: Module) -> Result<Subscription<Vec<Record>>> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let mut raw = self.store.subscribe(&tenant, module.as_str()).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(documents) = raw.recv().await {
                if tx.send(scope_documents(module, &tenant, documents)).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::with_task(rx, task))
    }

    /// The resolved tenant's active number document, if it belongs to it.
    pub async fn get_active_number(&self) -> Result<Option<ActiveNumberDoc>> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let doc = self.store.get_active_number(&tenant).await?;
        Ok(doc.filter(|doc| doc.tenant_id == tenant))
    }

    /// Write the resolved tenant's active number; `None` clears it.
    pub async fn set_active_number(&self, number: Option<&str>) -> Result<()> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let doc = ActiveNumberDoc {
            number: number.map(str::to_string),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_by: self.tenants.user_id().unwrap_or("anonymous").to_string(),
            tenant_id: tenant.clone(),
        };
        self.store.set_active_number(&tenant, &doc).await?;
        tracing::debug!(number, tenant = %tenant, "Stored remote active number");
        Ok(())
    }

    /// Pushes of the resolved tenant's active number document. Documents
    /// stamped with another tenant are dropped.
    pub async fn subscribe_active_number(&self) -> Result<Subscription<ActiveNumberDoc>> {
        self.ensure_ready().await?;
        let tenant = self.tenants.resolve().await;
        let mut raw = self.store.subscribe_active_number(&tenant).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(doc) = raw.recv().await {
                if doc.tenant_id != tenant {
                    tracing::debug!(found = %doc.tenant_id, tenant = %tenant, "Ignoring active number of another tenant");
                    continue;
                }
                if tx.send(doc).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::with_task(rx, task))
    }
}

fn scope_documents(module: Module, tenant: &str, documents: Vec<RemoteDocument>) -> Vec<Record> {
    let chain = module.identifier_chain();
    documents
        .into_iter()
        .filter_map(|doc| {
            let record = Record::remote(doc.body, &doc.id, chain)?;
            if record.tenant_id() != Some(tenant) {
                tracing::debug!(
                    module = %module,
                    id = %record.id,
                    tenant,
                    "Dropping remote record outside tenant scope"
                );
                return None;
            }
            Some(record)
        })
        .collect()
}

fn stamp_tenant(tenant: &str, body: &Value) -> Result<Value> {
    let mut body = body.clone();
    let Value::Object(map) = &mut body else {
        return Err(Error::Remote("record body must be a JSON object".into()));
    };
    match map.get("tenantId").and_then(Value::as_str) {
        Some(found) if found != tenant => Err(Error::TenantMismatch {
            expected: tenant.to_string(),
            found: found.to_string(),
        }),
        Some(_) => Ok(body),
        None => {
            map.insert("tenantId".into(), Value::String(tenant.to_string()));
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamp_adds_missing_tenant() {
        let body = stamp_tenant("acme", &json!({"id": "1"})).unwrap();
        assert_eq!(body["tenantId"], "acme");
    }

    #[test]
    fn stamp_rejects_foreign_tenant() {
        let err = stamp_tenant("acme", &json!({"id": "1", "tenantId": "globex"})).unwrap_err();
        assert!(matches!(err, Error::TenantMismatch { .. }));
    }

    #[test]
    fn stamp_rejects_non_objects() {
        assert!(stamp_tenant("acme", &json!([1, 2])).is_err());
    }

    #[test]
    fn scope_drops_foreign_and_unscoped_documents() {
        let docs = vec![
            RemoteDocument {
                id: "1".into(),
                body: json!({"id": "1", "tenantId": "acme"}),
            },
            RemoteDocument {
                id: "2".into(),
                body: json!({"id": "2", "tenantId": "globex"}),
            },
            RemoteDocument {
                id: "3".into(),
                body: json!({"id": "3"}),
            },
        ];

        let records = scope_documents(Module::Diesel, "acme", docs);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }
}
