use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::RemoteApi;
use crate::auth::TokenProvider;
use crate::cache::CacheManager;
use crate::network::{ReachabilityEvent, ReachabilityMonitor};
use crate::queue::{SyncQueue, SyncQueueItem};
use crate::store::keys;

// ============================================================================
// Constants
// ============================================================================

/// Failed attempts after which an item is abandoned.
pub const MAX_RETRIES: u32 = 3;

/// Pause between items within one drain pass.
pub const ITEM_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub item_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            item_delay: Duration::from_millis(ITEM_DELAY_MS),
        }
    }
}

/// What happened to one item during a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Synced,
    /// Failed; stays queued with the new retry count.
    Retrying(u32),
    /// Failed for the last time and was removed.
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Offline, no token, or another drain was already running.
    pub skipped: bool,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub is_syncing: bool,
}

/// Clears the in-progress flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replays the sync queue against the server.
///
/// Items are sent one at a time in enqueue order. Success removes an item;
/// failure bumps its retry count, and the `max_retries`-th failure removes it
/// for good. HTTP error statuses and transport errors are handled alike.
pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    cache: CacheManager,
    remote: Arc<dyn RemoteApi>,
    reachability: ReachabilityMonitor,
    config: SyncConfig,
    syncing: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<SyncQueue>,
        cache: CacheManager,
        remote: Arc<dyn RemoteApi>,
        reachability: ReachabilityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            remote,
            reachability,
            config,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Send one item. True only if the server accepted it.
    pub async fn sync_one(&self, item: &SyncQueueItem, auth_token: &str, api_base: &str) -> bool {
        self.sync_item(item, auth_token, api_base).await == ItemOutcome::Synced
    }

    async fn sync_item(&self, item: &SyncQueueItem, auth_token: &str, api_base: &str) -> ItemOutcome {
        let url = format!("{}{}", api_base.trim_end_matches('/'), item.endpoint);
        let result = self
            .remote
            .execute(item.method, &url, auth_token, item.payload.as_ref())
            .await;

        let err = match result {
            Ok(()) => {
                if let Err(e) = self.queue.remove(&item.id).await {
                    error!(id = %item.id, error = %e, "Synced item could not be dequeued");
                }
                info!(id = %item.id, op = %item.describe(), "Synced");
                return ItemOutcome::Synced;
            }
            Err(e) => e,
        };

        let mut updated = item.clone();
        updated.retry_count += 1;

        if updated.retry_count >= self.config.max_retries {
            warn!(
                id = %item.id,
                op = %item.describe(),
                attempts = updated.retry_count,
                transport = err.is_transport(),
                error = %err,
                "Giving up on queued mutation"
            );
            if let Err(e) = self.queue.remove(&item.id).await {
                error!(id = %item.id, error = %e, "Failed to drop exhausted item");
            }
            return ItemOutcome::Dropped;
        }

        debug!(
            id = %item.id,
            op = %item.describe(),
            retry_count = updated.retry_count,
            transport = err.is_transport(),
            error = %err,
            "Sync attempt failed"
        );
        match self.queue.update(&updated).await {
            Ok(true) => {}
            Ok(false) => debug!(id = %item.id, "Item left the queue during sync"),
            Err(e) => error!(id = %item.id, error = %e, "Failed to record retry"),
        }
        ItemOutcome::Retrying(updated.retry_count)
    }

    /// Send every queued item once, oldest first.
    ///
    /// Does nothing when offline, without a token, or while another drain is
    /// running. `@last_sync` is written after every completed pass.
    pub async fn drain_queue(&self, auth_token: Option<&str>, api_base: &str) -> DrainReport {
        if !self.reachability.is_connected() {
            debug!("Offline, not draining sync queue");
            return DrainReport::skipped();
        }
        let token = match auth_token {
            Some(t) if !t.is_empty() => t,
            _ => {
                debug!("No auth token, not draining sync queue");
                return DrainReport::skipped();
            }
        };
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress");
            return DrainReport::skipped();
        }
        let _guard = DrainGuard(&self.syncing);

        let items = self.queue.peek_all().await;
        let mut report = DrainReport::default();
        if !items.is_empty() {
            info!(pending = items.len(), "Draining sync queue");
        }

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.config.item_delay.is_zero() {
                tokio::time::sleep(self.config.item_delay).await;
            }
            report.attempted += 1;
            match self.sync_item(item, token, api_base).await {
                ItemOutcome::Synced => report.synced += 1,
                ItemOutcome::Retrying(_) => report.failed += 1,
                ItemOutcome::Dropped => report.dropped += 1,
            }
        }

        self.cache.cache(keys::LAST_SYNC, &Utc::now()).await;
        info!(
            synced = report.synced,
            failed = report.failed,
            dropped = report.dropped,
            "Sync pass complete"
        );
        report
    }

    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.cache.read_cache(keys::LAST_SYNC).await
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            pending: self.queue.len().await,
            last_sync: self.last_sync().await,
            is_online: self.reachability.is_connected(),
            is_syncing: self.is_syncing(),
        }
    }

    /// Drain whenever the monitor reports a reconnect. Runs until the
    /// monitor is dropped.
    pub fn spawn_reconnect_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<ReachabilityEvent>,
        tokens: Arc<dyn TokenProvider>,
        api_base: String,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ReachabilityEvent::Reconnected { at }) => {
                        debug!(%at, "Reconnected, draining sync queue");
                        let token = tokens.token();
                        engine.drain_queue(token.as_deref(), &api_base).await;
                    }
                    Ok(ReachabilityEvent::Disconnected { .. }) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Reconnect listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Reconnect listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, ApiError};
    use crate::auth::StaticToken;
    use crate::models::TaskInput;
    use crate::queue::{HttpMethod, Mutation, TaskMutation};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every request; fails the ones whose URL contains `fail_on`.
    #[derive(Default)]
    struct RecordingRemote {
        calls: Mutex<Vec<(HttpMethod, String, Option<serde_json::Value>)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RemoteApi for RecordingRemote {
        async fn execute(
            &self,
            method: HttpMethod,
            url: &str,
            _token: &str,
            payload: Option<&serde_json::Value>,
        ) -> Result<(), ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((method, url.to_string(), payload.cloned()));
            match &self.fail_on {
                Some(pattern) if url.contains(pattern.as_str()) => {
                    Err(ApiError::ServerError("nope".into()))
                }
                _ => Ok(()),
            }
        }
    }

    struct Harness {
        engine: Arc<SyncEngine>,
        queue: Arc<SyncQueue>,
        monitor: ReachabilityMonitor,
    }

    fn harness(remote: Arc<dyn RemoteApi>, online: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(SyncQueue::new(store.clone()));
        let monitor = ReachabilityMonitor::new(online);
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            CacheManager::new(store),
            remote,
            monitor.clone(),
            SyncConfig {
                item_delay: Duration::ZERO,
                ..SyncConfig::default()
            },
        ));
        Harness {
            engine,
            queue,
            monitor,
        }
    }

    fn create_task(name: &str) -> Mutation {
        Mutation::Task(TaskMutation::Create(TaskInput::new(name)))
    }

    fn delete_task(id: &str) -> Mutation {
        Mutation::Task(TaskMutation::Delete { id: id.into() })
    }

    #[tokio::test]
    async fn test_drain_sends_items_in_enqueue_order() {
        let remote = Arc::new(RecordingRemote::default());
        let h = harness(remote.clone(), true);
        h.queue.enqueue(delete_task("a")).await.unwrap();
        h.queue.enqueue(delete_task("b")).await.unwrap();
        h.queue.enqueue(delete_task("c")).await.unwrap();

        let report = h.engine.drain_queue(Some("tok"), "https://farm.example").await;

        let urls: Vec<String> = remote
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url, _)| url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://farm.example/tasks/a",
                "https://farm.example/tasks/b",
                "https://farm.example/tasks/c",
            ]
        );
        assert_eq!(report.synced, 3);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_the_pass() {
        let remote = Arc::new(RecordingRemote {
            fail_on: Some("/tasks/b".into()),
            ..RecordingRemote::default()
        });
        let h = harness(remote.clone(), true);
        h.queue.enqueue(delete_task("a")).await.unwrap();
        h.queue.enqueue(delete_task("b")).await.unwrap();
        h.queue.enqueue(delete_task("c")).await.unwrap();

        let report = h.engine.drain_queue(Some("tok"), "http://x").await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 1);

        let left = h.queue.peek_all().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].endpoint, "/tasks/b");
        assert_eq!(left[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_item_dropped_after_exactly_three_failures() {
        let remote = Arc::new(RecordingRemote {
            fail_on: Some("/tasks".into()),
            ..RecordingRemote::default()
        });
        let h = harness(remote.clone(), true);
        let item = h.queue.enqueue(create_task("Feed")).await.unwrap();

        assert!(!h.engine.sync_one(&item, "tok", "http://x").await);
        let item = h.queue.peek_all().await.remove(0);
        assert_eq!(item.retry_count, 1);

        assert!(!h.engine.sync_one(&item, "tok", "http://x").await);
        let item = h.queue.peek_all().await.remove(0);
        assert_eq!(item.retry_count, 2);

        assert!(!h.engine.sync_one(&item, "tok", "http://x").await);
        assert!(h.queue.is_empty().await);
        assert_eq!(remote.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_is_noop_offline_or_without_token() {
        let remote = Arc::new(RecordingRemote::default());
        let h = harness(remote.clone(), false);
        h.queue.enqueue(create_task("Feed")).await.unwrap();

        assert!(h.engine.drain_queue(Some("tok"), "http://x").await.skipped);

        h.monitor.handle_change(true);
        assert!(h.engine.drain_queue(None, "http://x").await.skipped);
        assert!(h.engine.drain_queue(Some(""), "http://x").await.skipped);

        assert!(remote.calls.lock().unwrap().is_empty());
        assert_eq!(h.queue.len().await, 1);
        assert!(h.engine.last_sync().await.is_none());
    }

    #[tokio::test]
    async fn test_last_sync_recorded_even_when_items_fail() {
        let remote = Arc::new(RecordingRemote {
            fail_on: Some("/".into()),
            ..RecordingRemote::default()
        });
        let h = harness(remote, true);
        h.queue.enqueue(create_task("Feed")).await.unwrap();

        let before = Utc::now();
        h.engine.drain_queue(Some("tok"), "http://x").await;
        let last = h.engine.last_sync().await.unwrap();
        assert!(last >= before);

        let status = h.engine.status().await;
        assert_eq!(status.pending, 1);
        assert!(status.is_online);
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let remote = Arc::new(RecordingRemote::default());
        let h = harness(remote, true);
        h.engine.syncing.store(true, Ordering::SeqCst);

        assert!(h.engine.drain_queue(Some("tok"), "http://x").await.skipped);

        h.engine.syncing.store(false, Ordering::SeqCst);
        assert!(!h.engine.drain_queue(Some("tok"), "http://x").await.skipped);
    }

    #[tokio::test]
    async fn test_offline_mutation_then_reconnect() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/tasks")
                    .header("authorization", "Bearer tok")
                    .json_body(json!({"task_name": "Feed"}));
                then.status(201).json_body(json!({"id": "t1", "task_name": "Feed"}));
            })
            .await;

        let api = Arc::new(ApiClient::new(server.base_url()).unwrap());
        let h = harness(api, false);

        let item = h.queue.enqueue(create_task("Feed")).await.unwrap();
        assert_eq!(h.queue.len().await, 1);

        let listener = h.engine.spawn_reconnect_listener(
            h.monitor.reconnect_events(),
            Arc::new(StaticToken::new("tok")),
            server.base_url(),
        );
        h.monitor.handle_change(true);

        for _ in 0..100 {
            if h.engine.last_sync().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(h.queue.len().await, 0);
        let last = h.engine.last_sync().await.unwrap();
        assert!(last >= item.enqueued_at);
        create.assert_async().await;
        listener.abort();
    }

    /// Base URL of a local port with nothing listening on it.
    fn closed_port_base() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[tokio::test]
    async fn test_connection_refused_counts_as_failure() {
        let base = closed_port_base();
        let api = ApiClient::new(base.clone()).unwrap();
        let refused = api
            .execute(HttpMethod::Post, &api.url("/tasks"), "tok", None)
            .await
            .unwrap_err();
        assert!(refused.is_transport());

        let h = harness(Arc::new(api), true);
        let item = h.queue.enqueue(create_task("Feed")).await.unwrap();
        assert_eq!(item.retry_count, 0);

        assert!(!h.engine.sync_one(&item, "tok", &base).await);
        let item = h.queue.peek_all().await.remove(0);
        assert_eq!(item.retry_count, 1);

        h.engine.drain_queue(Some("tok"), &base).await;
        let report = h.engine.drain_queue(Some("tok"), &base).await;
        assert_eq!(report.dropped, 1);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_slow_server_times_out_as_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/tasks");
                then.status(201).delay(Duration::from_millis(500));
            })
            .await;

        let api = ApiClient::with_timeout(server.base_url(), Duration::from_millis(50)).unwrap();
        let timed_out = api
            .execute(HttpMethod::Post, &api.url("/tasks"), "tok", None)
            .await
            .unwrap_err();
        assert!(matches!(timed_out, ApiError::Timeout));

        let h = harness(Arc::new(api), true);
        let item = h.queue.enqueue(create_task("Feed")).await.unwrap();

        assert!(!h.engine.sync_one(&item, "tok", &server.base_url()).await);
        assert_eq!(h.queue.peek_all().await[0].retry_count, 1);

        h.engine.drain_queue(Some("tok"), &server.base_url()).await;
        let report = h.engine.drain_queue(Some("tok"), &server.base_url()).await;
        assert_eq!(report.dropped, 1);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_always_failing_endpoint_is_abandoned_after_three_drains() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/tasks");
                then.status(500);
            })
            .await;

        let api = Arc::new(ApiClient::new(server.base_url()).unwrap());
        let h = harness(api, true);
        h.queue.enqueue(create_task("Feed")).await.unwrap();

        h.engine.drain_queue(Some("tok"), &server.base_url()).await;
        h.engine.drain_queue(Some("tok"), &server.base_url()).await;
        assert_eq!(h.queue.peek_all().await[0].retry_count, 2);

        let report = h.engine.drain_queue(Some("tok"), &server.base_url()).await;
        assert_eq!(report.dropped, 1);
        assert!(h.queue.is_empty().await);
        failing.assert_hits_async(3).await;
    }
}
