//! In-process document store.
//!
//! Used by tests and local dry runs. Revisions are decimal counters kept in
//! `_rev`, mirroring the Postgres store.

use super::{DocumentStore, INDEX_CONTAINS, INDEX_PREFIX, Page, doc_id};
use crate::error::Result;
use crate::model::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a typed document, ignoring revisions.
    pub fn put<T: Document>(&self, doc: &T) -> Result<()> {
        let mut value = serde_json::to_value(doc)?;
        let id = doc.id().to_string();
        let mut collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        let docs = collections.entry(T::COLLECTION.to_string()).or_default();
        let rev = docs.get(&id).map(revision).unwrap_or(0) + 1;
        value["_rev"] = Value::String(rev.to_string());
        docs.insert(id, value);
        Ok(())
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        collections.get(collection).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn revision(doc: &Value) -> u64 {
    doc.get("_rev")
        .and_then(Value::as_str)
        .and_then(|r| r.parse().ok())
        .unwrap_or(0)
}

fn matches(id: &str, doc: &Value, index: &str, key: &str) -> bool {
    match index {
        INDEX_CONTAINS => doc
            .get("chain")
            .and_then(Value::as_array)
            .is_some_and(|chain| chain.iter().any(|p| p.as_str() == Some(key))),
        INDEX_PREFIX => id.starts_with(key),
        field => doc.get(field).and_then(Value::as_str) == Some(key),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        Ok(collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn update(&self, collection: &str, doc: &Value) -> Result<bool> {
        let id = doc_id(doc)?;
        let mut collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        let Some(current) = collections.get_mut(collection).and_then(|docs| docs.get_mut(id))
        else {
            return Ok(false);
        };

        let rev = revision(current);
        if doc.get("_rev").and_then(Value::as_str) != Some(rev.to_string().as_str()) {
            return Ok(false);
        }

        let mut next = doc.clone();
        next["_rev"] = Value::String((rev + 1).to_string());
        *current = next;
        Ok(true)
    }

    async fn create(&self, collection: &str, doc: &Value) -> Result<bool> {
        let id = doc_id(doc)?.to_string();
        let mut collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Ok(false);
        }
        let mut value = doc.clone();
        value["_rev"] = Value::String("1".to_string());
        docs.insert(id, value);
        Ok(true)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        Ok(collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id)))
    }

    async fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        key: &str,
        page: Page,
    ) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|p| p.into_inner());
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let hits = docs
            .iter()
            .filter(|(id, doc)| matches(id, doc, index, key))
            .map(|(_, doc)| doc.clone());
        Ok(match page.bounds() {
            None => hits.collect(),
            Some((skip, take)) => hits.skip(skip).take(take).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChainedRequest, Request};
    use crate::store::Repo;
    use std::sync::Arc;

    #[tokio::test]
    async fn stale_revision_is_refused() {
        let store = Arc::new(MemoryStore::new());
        store.put(&Request::new("PPD-Run3-00001", "Run3")).unwrap();
        let repo = Repo::new(store);

        let first: Request = repo.get("PPD-Run3-00001").await.unwrap();
        let second = first.clone();

        assert!(repo.update(&first).await.unwrap());
        assert!(!repo.update(&second).await.unwrap());
    }

    #[tokio::test]
    async fn contains_index_finds_chains() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&ChainedRequest::new("c1", vec!["A-1".into(), "B-1".into()]))
            .unwrap();
        store
            .put(&ChainedRequest::new("c2", vec!["A-2".into()]))
            .unwrap();
        let repo = Repo::new(store);

        let chains: Vec<ChainedRequest> = repo.query(INDEX_CONTAINS, "B-1").await.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].prepid(), "c1");
    }
}
