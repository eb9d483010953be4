//! Postgres-backed document store: one JSONB row per document.

use super::{DocumentStore, INDEX_CONTAINS, INDEX_PREFIX, Page, doc_id};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Store handle. Owns the connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Body without `_rev`, plus the revision it claims to be based on.
fn split_rev(doc: &Value) -> (Value, Option<i64>) {
    let rev = doc
        .get("_rev")
        .and_then(Value::as_str)
        .and_then(|r| r.parse().ok());
    let mut body = doc.clone();
    if let Some(map) = body.as_object_mut() {
        map.remove("_rev");
    }
    (body, rev)
}

fn with_rev(mut body: Value, rev: i64) -> Value {
    if let Some(map) = body.as_object_mut() {
        map.insert("_rev".to_string(), Value::String(rev.to_string()));
    }
    body
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let row: Option<(Value, i64)> =
            sqlx::query_as("SELECT body, rev FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(body, rev)| with_rev(body, rev)))
    }

    async fn update(&self, collection: &str, doc: &Value) -> Result<bool> {
        let id = doc_id(doc)?;
        let (body, Some(rev)) = split_rev(doc) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE documents SET body = $3, rev = rev + 1, updated_at = now()
             WHERE collection = $1 AND id = $2 AND rev = $4",
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .bind(rev)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create(&self, collection: &str, doc: &Value) -> Result<bool> {
        let id = doc_id(doc)?;
        let (body, _) = split_rev(doc);
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM documents WHERE collection = $1 AND id = $2)",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        key: &str,
        page: Page,
    ) -> Result<Vec<Value>> {
        let predicate = match index {
            INDEX_CONTAINS => "body -> 'chain' ? $2",
            INDEX_PREFIX => "starts_with(id, $2)",
            _ => "body ->> $3 = $2",
        };
        let (offset, limit) = page
            .bounds()
            .map(|(skip, take)| (skip as i64, Some(take as i64)))
            .unwrap_or((0, None));

        let sql = format!(
            "SELECT body, rev FROM documents
             WHERE collection = $1 AND {predicate}
             ORDER BY id OFFSET $4 LIMIT $5"
        );
        let rows: Vec<(Value, i64)> = sqlx::query_as(&sql)
            .bind(collection)
            .bind(key)
            .bind(index)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(body, rev)| with_rev(body, rev)).collect())
    }
}
