use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::item::SyncQueueItem;
use super::mutation::Mutation;
use crate::store::{keys, KeyValueStore};

/// Durable FIFO of pending mutations, stored as one JSON array under
/// `@sync_queue`.
///
/// Every operation rewrites the whole list. Read-modify-write cycles from
/// this process are serialized by `write_lock`.
pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Read the persisted list. Missing or corrupt data is an empty queue;
    /// a failed read is an error so callers never rewrite over entries they
    /// could not see.
    async fn load(&self) -> Result<Vec<SyncQueueItem>> {
        let contents = match self
            .store
            .get(keys::SYNC_QUEUE)
            .await
            .context("Failed to read sync queue")?
        {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        match serde_json::from_str(&contents) {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(error = %e, "Sync queue is unreadable, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, items: &[SyncQueueItem]) -> Result<()> {
        let contents = serde_json::to_string(items)?;
        self.store
            .set(keys::SYNC_QUEUE, &contents)
            .await
            .context("Failed to persist sync queue")?;
        Ok(())
    }

    /// Append a mutation and persist. Returns the stored item.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<SyncQueueItem> {
        let item = SyncQueueItem {
            id: Uuid::new_v4().to_string(),
            entity_type: mutation.entity_type(),
            action: mutation.action(),
            endpoint: mutation.endpoint(),
            method: mutation.method(),
            payload: mutation.payload(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        };

        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;
        items.push(item.clone());
        self.persist(&items).await?;

        info!(id = %item.id, op = %item.describe(), pending = items.len(), "Queued mutation");
        Ok(item)
    }

    /// Current queue contents in enqueue order. A failed read yields an
    /// empty snapshot.
    pub async fn peek_all(&self) -> Vec<SyncQueueItem> {
        match self.load().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Sync queue unavailable");
                Vec::new()
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.peek_all().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delete one item by id. Unknown ids are ignored.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            debug!(id = id, "Queue item already gone");
            return Ok(());
        }
        self.persist(&items).await
    }

    /// Replace the stored copy of `item` (matched by id), keeping its position.
    /// Returns false if the item is no longer queued.
    pub async fn update(&self, item: &SyncQueueItem) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                *existing = item.clone();
                self.persist(&items).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(&[]).await?;
        info!("Cleared sync queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::models::TaskInput;
    use crate::queue::{EntityType, HttpMethod, TaskMutation};
    use crate::store::{MemoryStore, StoreError, StoreResult};

    fn create_task(name: &str) -> Mutation {
        Mutation::Task(TaskMutation::Create(TaskInput::new(name)))
    }

    fn queue() -> (SyncQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SyncQueue::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_enqueue_builds_fresh_item() {
        let (queue, _) = queue();
        let item = queue.enqueue(create_task("Feed")).await.unwrap();

        assert_eq!(item.retry_count, 0);
        assert_eq!(item.entity_type, EntityType::Task);
        assert_eq!(item.method, HttpMethod::Post);
        assert_eq!(item.endpoint, "/tasks");
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_order_is_fifo() {
        let (queue, _) = queue();
        let a = queue.enqueue(create_task("A")).await.unwrap();
        let b = queue.enqueue(create_task("B")).await.unwrap();
        let c = queue.enqueue(create_task("C")).await.unwrap();
        assert_ne!(a.id, b.id);

        let ids: Vec<String> = queue.peek_all().await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (queue, _) = queue();
        let a = queue.enqueue(create_task("A")).await.unwrap();
        let b = queue.enqueue(create_task("B")).await.unwrap();

        queue.remove(&a.id).await.unwrap();
        queue.remove("not-there").await.unwrap();
        let remaining = queue.peek_all().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);

        queue.clear().await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_in_place_keeps_position() {
        let (queue, _) = queue();
        let mut a = queue.enqueue(create_task("A")).await.unwrap();
        queue.enqueue(create_task("B")).await.unwrap();

        a.retry_count = 2;
        assert!(queue.update(&a).await.unwrap());

        let items = queue.peek_all().await;
        assert_eq!(items[0].id, a.id);
        assert_eq!(items[0].retry_count, 2);

        queue.remove(&a.id).await.unwrap();
        assert!(!queue.update(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_queue_reads_as_empty_and_recovers() {
        let (queue, store) = queue();
        store.set(keys::SYNC_QUEUE, "[{\"broken\"").await.unwrap();

        assert!(queue.peek_all().await.is_empty());
        queue.enqueue(create_task("A")).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    /// Store whose next `get` fails once when armed.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next_get: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            if self.fail_next_get.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk busy"),
                });
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key).await
        }

        async fn keys(&self) -> StoreResult<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_read_failure_keeps_pending_items() {
        let store = Arc::new(FlakyStore::default());
        let queue = SyncQueue::new(store.clone());
        let a = queue.enqueue(create_task("A")).await.unwrap();
        queue.enqueue(create_task("B")).await.unwrap();
        queue.enqueue(create_task("C")).await.unwrap();

        store.fail_next_get.store(true, Ordering::SeqCst);
        assert!(queue.enqueue(create_task("D")).await.is_err());
        assert_eq!(queue.len().await, 3);

        store.fail_next_get.store(true, Ordering::SeqCst);
        assert!(queue.remove(&a.id).await.is_err());
        store.fail_next_get.store(true, Ordering::SeqCst);
        assert!(queue.update(&a).await.is_err());
        assert_eq!(queue.len().await, 3);

        queue.enqueue(create_task("D")).await.unwrap();
        assert_eq!(queue.len().await, 4);
    }

    #[tokio::test]
    async fn test_queue_persists_across_instances() {
        let store = Arc::new(MemoryStore::new());
        SyncQueue::new(store.clone())
            .enqueue(create_task("A"))
            .await
            .unwrap();

        let reopened = SyncQueue::new(store);
        assert_eq!(reopened.len().await, 1);
    }
}
