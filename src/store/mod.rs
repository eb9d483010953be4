//! Document store interface.
//!
//! The orchestrator never sees the store's wire format: it reads and writes
//! JSON documents through [`DocumentStore`] and typed records through
//! [`Repo`]. Every document carries `_id` and an opaque `_rev`; an update
//! whose `_rev` no longer matches is refused with `Ok(false)`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{Error, Result};
use crate::model::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Chains whose `chain` array contains the key.
pub const INDEX_CONTAINS: &str = "contains";
/// Documents whose id starts with the key.
pub const INDEX_PREFIX: &str = "prefix";

/// Documents per page when a page number is given.
pub const PAGE_SIZE: usize = 20;

/// Which slice of an index query to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    #[default]
    All,
    /// Zero-based page of [`PAGE_SIZE`] documents.
    Number(usize),
}

impl Page {
    pub(crate) fn bounds(self) -> Option<(usize, usize)> {
        match self {
            Page::All => None,
            Page::Number(n) => Some((n * PAGE_SIZE, PAGE_SIZE)),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Replace an existing document. `Ok(false)` on revision conflict or
    /// when the document does not exist.
    async fn update(&self, collection: &str, doc: &Value) -> Result<bool>;

    /// Insert a new document. `Ok(false)` if the id is taken.
    async fn create(&self, collection: &str, doc: &Value) -> Result<bool>;

    async fn exists(&self, collection: &str, id: &str) -> Result<bool>;

    /// Query by index. [`INDEX_CONTAINS`] and [`INDEX_PREFIX`] are special;
    /// any other index name matches a top-level string field by equality.
    async fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        key: &str,
        page: Page,
    ) -> Result<Vec<Value>>;
}

/// Typed access to a [`DocumentStore`].
#[derive(Clone)]
pub struct Repo {
    store: Arc<dyn DocumentStore>,
}

impl Repo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn get<T: Document>(&self, id: &str) -> Result<T> {
        let doc = self
            .store
            .get(T::COLLECTION, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{id}", T::COLLECTION)))?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn update<T: Document>(&self, doc: &T) -> Result<bool> {
        let value = serde_json::to_value(doc)?;
        self.store.update(T::COLLECTION, &value).await
    }

    pub async fn create<T: Document>(&self, doc: &T) -> Result<bool> {
        let value = serde_json::to_value(doc)?;
        self.store.create(T::COLLECTION, &value).await
    }

    pub async fn exists<T: Document>(&self, id: &str) -> Result<bool> {
        self.store.exists(T::COLLECTION, id).await
    }

    pub async fn query<T: Document>(&self, index: &str, key: &str) -> Result<Vec<T>> {
        self.store
            .query_by_index(T::COLLECTION, index, key, Page::All)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }
}

pub(crate) fn doc_id(doc: &Value) -> Result<&str> {
    doc.get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Other("document has no _id".to_string()))
}
