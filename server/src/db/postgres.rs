//! PostgreSQL-backed document store.

use super::DocumentStore;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tandem_engine::remote::protocol::{ActiveNumberDoc, RemoteDocument};

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Document store over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: Pool,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and bring the schema up to date.
    pub async fn connect(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn document_from_row(row: &PgRow) -> std::result::Result<RemoteDocument, sqlx::Error> {
    Ok(RemoteDocument {
        id: row.try_get("doc_id")?,
        body: row.try_get("body")?,
    })
}

fn active_number_from_row(row: &PgRow) -> std::result::Result<ActiveNumberDoc, sqlx::Error> {
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(ActiveNumberDoc {
        number: row.try_get("number")?,
        updated_at: updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        updated_by: row.try_get("updated_by")?,
        tenant_id: row.try_get("tenant_id")?,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn list(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, body
            FROM documents
            WHERE tenant_id = $1 AND collection = $2
            ORDER BY doc_id
            "#,
        )
        .bind(tenant)
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(document_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn put(&self, tenant: &str, collection: &str, doc_id: &str, body: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (tenant_id, collection, doc_id, body, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (tenant_id, collection, doc_id) DO UPDATE SET
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(tenant)
        .bind(collection)
        .bind(doc_id)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, number, updated_at, updated_by
            FROM active_numbers
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(active_number_from_row).transpose()?)
    }

    async fn put_active_number(&self, doc: &ActiveNumberDoc) -> Result<()> {
        let updated_at = DateTime::parse_from_rfc3339(&doc.updated_at)
            .map_err(|e| AppError::BadRequest(format!("invalid updatedAt: {e}")))?
            .with_timezone(&Utc);

        sqlx::query(
            r#"
            INSERT INTO active_numbers (tenant_id, number, updated_at, updated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE SET
                number = EXCLUDED.number,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by
            "#,
        )
        .bind(&doc.tenant_id)
        .bind(&doc.number)
        .bind(updated_at)
        .bind(&doc.updated_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn user_tenant(&self, user_id: &str) -> Result<Option<String>> {
        let tenant: Option<Option<String>> =
            sqlx::query_scalar("SELECT tenant_id FROM user_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tenant.flatten())
    }

    async fn put_user_tenant(&self, user_id: &str, tenant: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, tenant_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(user_id)
        .bind(tenant)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
