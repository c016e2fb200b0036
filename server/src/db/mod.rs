//! Document persistence.
//!
//! [`DocumentStore`] is the seam between the HTTP layer and storage.
//! [`PgDocumentStore`] backs production with PostgreSQL; [`MemoryStore`]
//! keeps everything in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgDocumentStore, Pool};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tandem_engine::remote::protocol::{ActiveNumberDoc, RemoteDocument};

/// Tenant-partitioned document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document of a tenant's collection, ordered by key.
    async fn list(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>>;

    /// Create or replace one document.
    async fn put(&self, tenant: &str, collection: &str, doc_id: &str, body: &Value) -> Result<()>;

    async fn active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>>;

    /// Create or replace the tenant's active number document.
    async fn put_active_number(&self, doc: &ActiveNumberDoc) -> Result<()>;

    /// Tenant recorded on a user's profile.
    async fn user_tenant(&self, user_id: &str) -> Result<Option<String>>;

    async fn put_user_tenant(&self, user_id: &str, tenant: Option<&str>) -> Result<()>;
}
