//! The layer the UI talks to.
//!
//! `FarmData` reads through the API with a cache fallback, applies mutations
//! optimistically to the cache before queueing them, and keeps reminders in
//! step with freshly fetched data.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::TokenProvider;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::models::{Checkup, Task, Vaccination, Veterinarian};
use crate::network::ReachabilityMonitor;
use crate::notify::{NotificationScheduler, RefreshReport};
use crate::queue::{CheckupMutation, Mutation, SyncQueue, TaskMutation, VaccinationMutation};
use crate::store::{keys, KeyValueStore};
use crate::sync::{DrainReport, SyncEngine, SyncStatus};

/// Prefix for ids assigned to entities created offline.
pub const LOCAL_ID_PREFIX: &str = "local_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Cache,
    Empty,
}

/// A list read, tagged with where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Fetched<T> {
    pub data: Vec<T>,
    pub source: DataSource,
    pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Fetched<T> {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            source: DataSource::Empty,
            cached_at: None,
        }
    }

    /// The data if it came from the server, else nothing. Cached lists may
    /// hold locally created entities whose ids the server will replace.
    fn remote_only(&self) -> &[T] {
        match self.source {
            DataSource::Remote => self.data.as_slice(),
            DataSource::Cache | DataSource::Empty => &[],
        }
    }
}

/// What `submit` did with a mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitReceipt {
    /// Id given to an entity created locally.
    pub local_id: Option<String>,
    pub queued: bool,
    /// A background drain was started because the device is online.
    pub sync_started: bool,
}

/// Farm data access for the UI layer.
pub struct FarmData {
    api: ApiClient,
    cache: CacheManager,
    engine: Arc<SyncEngine>,
    scheduler: Arc<NotificationScheduler>,
    reachability: ReachabilityMonitor,
    tokens: Arc<dyn TokenProvider>,
    task_lead_minutes: i64,
    daily_summary: Option<crate::config::DailySummary>,
    edit_lock: Mutex<()>,
    background_sync: Mutex<Option<JoinHandle<DrainReport>>>,
}

impl FarmData {
    pub fn new(
        api: ApiClient,
        store: Arc<dyn KeyValueStore>,
        reachability: ReachabilityMonitor,
        scheduler: Arc<NotificationScheduler>,
        tokens: Arc<dyn TokenProvider>,
        config: &Config,
    ) -> Self {
        let cache = CacheManager::new(store.clone());
        let queue = Arc::new(SyncQueue::new(store));
        let engine = Arc::new(SyncEngine::new(
            queue,
            cache.clone(),
            Arc::new(api.clone()),
            reachability.clone(),
            config.sync_config(),
        ));
        Self {
            api,
            cache,
            engine,
            scheduler,
            reachability,
            tokens,
            task_lead_minutes: config.task_reminder_lead_minutes,
            daily_summary: config.daily_summary,
            edit_lock: Mutex::new(()),
            background_sync: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        self.engine.queue()
    }

    pub fn scheduler(&self) -> &Arc<NotificationScheduler> {
        &self.scheduler
    }

    pub fn api_base(&self) -> &str {
        self.api.api_base()
    }

    /// Bring up the scheduler and the daily summary, if configured.
    pub async fn initialize(&self) -> bool {
        let ready = self.scheduler.initialize().await;
        if ready {
            if let Some(summary) = self.daily_summary {
                self.scheduler
                    .schedule_daily_summary(summary.hour, summary.minute)
                    .await;
            }
        }
        ready
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn fetch_tasks(&self) -> Fetched<Task> {
        let fetched = self
            .fetch_list(keys::TASKS, |c| async move { c.fetch_tasks().await })
            .await;
        if fetched.source == DataSource::Remote {
            self.scheduler
                .refresh_reminders(&fetched.data, &[], &[], self.task_lead_minutes)
                .await;
        }
        fetched
    }

    pub async fn fetch_vaccinations(&self) -> Fetched<Vaccination> {
        let fetched = self
            .fetch_list(keys::VACCINATIONS, |c| async move {
                c.fetch_vaccinations().await
            })
            .await;
        if fetched.source == DataSource::Remote {
            self.scheduler
                .refresh_reminders(&[], &fetched.data, &[], self.task_lead_minutes)
                .await;
        }
        fetched
    }

    pub async fn fetch_checkups(&self) -> Fetched<Checkup> {
        let fetched = self
            .fetch_list(keys::CHECKUPS, |c| async move { c.fetch_checkups().await })
            .await;
        if fetched.source == DataSource::Remote {
            self.scheduler
                .refresh_reminders(&[], &[], &fetched.data, self.task_lead_minutes)
                .await;
        }
        fetched
    }

    pub async fn fetch_vets(&self, city: &str, animal_type: &str) -> Fetched<Veterinarian> {
        let key = keys::vets(city, animal_type);
        let city = city.to_string();
        let animal_type = animal_type.to_string();
        self.fetch_list(&key, move |c| async move {
            c.fetch_vets(&city, &animal_type).await
        })
        .await
    }

    /// Fetch everything concurrently and re-register reminders for every
    /// collection the server answered. Cached collections keep the
    /// reminders they already have.
    pub async fn refresh_all(&self) -> RefreshReport {
        let (tasks, vaccinations, checkups) = tokio::join!(
            self.fetch_list(keys::TASKS, |c| async move { c.fetch_tasks().await }),
            self.fetch_list(keys::VACCINATIONS, |c| async move {
                c.fetch_vaccinations().await
            }),
            self.fetch_list(keys::CHECKUPS, |c| async move { c.fetch_checkups().await }),
        );
        self.scheduler
            .refresh_reminders(
                tasks.remote_only(),
                vaccinations.remote_only(),
                checkups.remote_only(),
                self.task_lead_minutes,
            )
            .await
    }

    async fn fetch_list<T, F, Fut>(&self, key: &str, request: F) -> Fetched<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ApiError>>,
    {
        if !self.reachability.is_connected() {
            debug!(key = key, "Offline, reading from cache");
        } else if let Some(token) = self.tokens.token() {
            match request(self.api.with_token(token)).await {
                Ok(data) => {
                    self.cache.cache(key, &data).await;
                    return Fetched {
                        data,
                        source: DataSource::Remote,
                        cached_at: Some(Utc::now()),
                    };
                }
                Err(e) => warn!(key = key, error = %e, "Fetch failed, falling back to cache"),
            }
        } else {
            debug!(key = key, "No auth token, reading from cache");
        }

        match self.cache.read_entry::<Vec<T>>(key).await {
            Some(entry) => Fetched {
                data: entry.data,
                source: DataSource::Cache,
                cached_at: Some(entry.cached_at),
            },
            None => Fetched::empty(),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Apply a mutation locally and queue it. When online a drain is started
    /// in the background; `settle` waits for it. Never fails from the
    /// caller's point of view.
    pub async fn submit(&self, mutation: Mutation) -> SubmitReceipt {
        let mut receipt = SubmitReceipt {
            local_id: self.apply_locally(&mutation).await,
            ..SubmitReceipt::default()
        };

        match self.engine.queue().enqueue(mutation).await {
            Ok(_) => receipt.queued = true,
            Err(e) => warn!(error = %e, "Failed to queue mutation"),
        }

        if self.reachability.is_connected() {
            let engine = Arc::clone(&self.engine);
            let tokens = Arc::clone(&self.tokens);
            let api_base = self.api.api_base().to_string();
            let handle = tokio::spawn(async move {
                let token = tokens.token();
                engine.drain_queue(token.as_deref(), &api_base).await
            });
            *self.background_sync.lock().await = Some(handle);
            receipt.sync_started = true;
        }
        receipt
    }

    /// Wait for the drain started by the latest online `submit`, if any.
    pub async fn settle(&self) -> Option<DrainReport> {
        let handle = self.background_sync.lock().await.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Background sync task failed");
                None
            }
        }
    }

    /// Drain the queue with the current token.
    pub async fn sync_now(&self) -> DrainReport {
        let token = self.tokens.token();
        self.engine
            .drain_queue(token.as_deref(), self.api.api_base())
            .await
    }

    pub async fn status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// Optimistic cache edit. Returns the local id of a created entity.
    async fn apply_locally(&self, mutation: &Mutation) -> Option<String> {
        let _guard = self.edit_lock.lock().await;
        let local_id = matches!(
            mutation,
            Mutation::Task(TaskMutation::Create(_))
                | Mutation::Vaccination(VaccinationMutation::Create(_))
                | Mutation::Checkup(CheckupMutation::Create(_))
        )
        .then(|| format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()));

        match mutation {
            Mutation::Task(m) => {
                let mut tasks: Vec<Task> = self.cache.read_cache(keys::TASKS).await.unwrap_or_default();
                match m {
                    TaskMutation::Create(input) => {
                        let id = local_id.clone().unwrap_or_default();
                        tasks.push(input.clone().into_task(id));
                    }
                    TaskMutation::Update { id, changes } => {
                        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                            changes.apply_to(task);
                        }
                    }
                    TaskMutation::SetStatus { id, status } => {
                        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                            task.status = *status;
                        }
                    }
                    TaskMutation::Delete { id } => tasks.retain(|t| &t.id != id),
                }
                self.cache.save_tasks(&tasks).await;
            }
            Mutation::Vaccination(m) => {
                let mut vaccinations: Vec<Vaccination> = self
                    .cache
                    .read_cache(keys::VACCINATIONS)
                    .await
                    .unwrap_or_default();
                match m {
                    VaccinationMutation::Create(input) => {
                        let id = local_id.clone().unwrap_or_default();
                        vaccinations.push(input.clone().into_vaccination(id));
                    }
                    VaccinationMutation::Update { id, changes } => {
                        if let Some(v) = vaccinations.iter_mut().find(|v| &v.id == id) {
                            changes.apply_to(v);
                        }
                    }
                    VaccinationMutation::Delete { id } => vaccinations.retain(|v| &v.id != id),
                }
                self.cache.save_vaccinations(&vaccinations).await;
            }
            Mutation::Checkup(m) => {
                let mut checkups: Vec<Checkup> =
                    self.cache.read_cache(keys::CHECKUPS).await.unwrap_or_default();
                match m {
                    CheckupMutation::Create(input) => {
                        let id = local_id.clone().unwrap_or_default();
                        checkups.push(input.clone().into_checkup(id));
                    }
                    CheckupMutation::Update { id, changes } => {
                        if let Some(c) = checkups.iter_mut().find(|c| &c.id == id) {
                            changes.apply_to(c);
                        }
                    }
                    CheckupMutation::Delete { id } => checkups.retain(|c| &c.id != id),
                }
                self.cache.save_checkups(&checkups).await;
            }
        }
        local_id
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Clear all offline data, cancel all reminders, forget the token.
    pub async fn logout(&self) {
        self.cache.clear_all().await;
        self.scheduler.teardown().await;
        self.tokens.forget();
        info!("Logged out, offline data cleared");
    }
}
