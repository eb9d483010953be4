//! Batch id allocation.
//!
//! Injections are grouped into batches named `{batch_name}-{NNNNN}`. A new
//! injection joins the newest batch that has not been announced yet; when
//! there is none, the next number is minted.

use crate::error::{Error, Result};
use crate::locker::Locker;
use crate::model::{Batch, BatchStatus, HistoryEntry};
use crate::store::{INDEX_PREFIX, Repo};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait BatchAllocator: Send + Sync {
    /// Id of the batch the next injection under `batch_name` belongs to.
    async fn next_batch_id(&self, batch_name: &str) -> Result<String>;
}

pub struct StoreBatchAllocator {
    repo: Repo,
    locker: Arc<Locker>,
}

impl StoreBatchAllocator {
    pub fn new(repo: Repo, locker: Arc<Locker>) -> Self {
        Self { repo, locker }
    }
}

fn sequence_number(batch_name: &str, id: &str) -> Option<u32> {
    id.strip_prefix(batch_name)?.strip_prefix('-')?.parse().ok()
}

#[async_trait]
impl BatchAllocator for StoreBatchAllocator {
    async fn next_batch_id(&self, batch_name: &str) -> Result<String> {
        let _guard = self
            .locker
            .lock(&format!("{batch_name}-batch-allocation"))
            .acquire()
            .await;

        let prefix = format!("{batch_name}-");
        let batches: Vec<Batch> = self.repo.query(INDEX_PREFIX, &prefix).await?;
        let numbered: Vec<(u32, &Batch)> = batches
            .iter()
            .filter_map(|b| sequence_number(batch_name, b.prepid()).map(|n| (n, b)))
            .collect();

        if let Some((_, open)) = numbered
            .iter()
            .filter(|(_, b)| b.status() == BatchStatus::New)
            .max_by_key(|(n, _)| *n)
        {
            return Ok(open.prepid().to_string());
        }

        let next = numbered.iter().map(|(n, _)| *n).max().unwrap_or(0) + 1;
        let id = format!("{batch_name}-{next:05}");
        let mut batch = Batch::new(&id);
        batch.push_history(HistoryEntry::new("created", ""));
        if !self.repo.create(&batch).await? {
            return Err(Error::Other(format!("batch {id} already exists")));
        }
        info!(batch_id = %id, "minted new batch");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn open_batch_is_reused_and_announced_ones_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&Batch::new("Run3-00001").with_status(BatchStatus::Announced))
            .unwrap();
        store.put(&Batch::new("Run3-00002")).unwrap();
        store.put(&Batch::new("Run3Other-00009")).unwrap();
        let allocator = StoreBatchAllocator::new(Repo::new(store), Arc::new(Locker::new()));

        assert_eq!(allocator.next_batch_id("Run3").await.unwrap(), "Run3-00002");
    }

    #[tokio::test]
    async fn a_batch_is_minted_when_none_is_open() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&Batch::new("Task_Run3-00004").with_status(BatchStatus::Done))
            .unwrap();
        let allocator =
            StoreBatchAllocator::new(Repo::new(store.clone()), Arc::new(Locker::new()));

        assert_eq!(
            allocator.next_batch_id("Task_Run3").await.unwrap(),
            "Task_Run3-00005"
        );
        assert_eq!(store.len("batches"), 2);
        assert_eq!(
            allocator.next_batch_id("Task_Run3").await.unwrap(),
            "Task_Run3-00005"
        );
    }
}
