use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Checkup, Task, Vaccination, Veterinarian};
use crate::store::{keys, KeyValueStore};

/// Consider cache stale after 1 hour.
const CACHE_STALE_MINUTES: i64 = 60;

/// Persisted envelope: `{ "data": ..., "timestamp": "<rfc3339>" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    #[serde(rename = "timestamp")]
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew (negative age)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// Snapshot cache over the key-value store.
///
/// Reads never fail: a missing or unreadable entry is `None`, which callers
/// treat as "no offline data". Writes log and swallow storage errors.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn save<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        let contents = serde_json::to_string(&CachedData::new(data))?;
        self.store
            .set(key, &contents)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", key))?;
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CachedData<T>>> {
        let contents = match self.store.get(key).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let cached = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache entry: {}", key))?;
        Ok(Some(cached))
    }

    /// Store `data` under `key`, replacing whatever was there.
    pub async fn cache<T: Serialize + ?Sized>(&self, key: &str, data: &T) {
        match self.save(key, data).await {
            Ok(()) => debug!(key = key, "Cached data"),
            Err(e) => warn!(key = key, error = %e, "Failed to cache data"),
        }
    }

    /// Read the data stored under `key`, or `None` if absent or unreadable.
    pub async fn read_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read_entry(key).await.map(|entry| entry.data)
    }

    /// Like `read_cache` but keeps the timestamp.
    pub async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CachedData<T>> {
        match self.load(key).await {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key = key, error = %e, "Cache entry unavailable");
                None
            }
        }
    }

    /// Remove every key this subsystem owns (logout).
    pub async fn clear_all(&self) {
        let mut targets: Vec<String> = keys::FIXED.iter().map(|k| k.to_string()).collect();
        match self.store.keys().await {
            Ok(all) => targets.extend(
                all.into_iter()
                    .filter(|k| k.starts_with(keys::VETS_PREFIX)),
            ),
            Err(e) => warn!(error = %e, "Failed to list stored keys"),
        }

        for key in &targets {
            if let Err(e) = self.store.remove(key).await {
                warn!(key = %key, error = %e, "Failed to clear cache entry");
            }
        }
        debug!(count = targets.len(), "Cleared offline data");
    }

    // ===== Tasks =====

    pub async fn load_tasks(&self) -> Option<CachedData<Vec<Task>>> {
        self.read_entry(keys::TASKS).await
    }

    pub async fn save_tasks(&self, tasks: &[Task]) {
        self.cache(keys::TASKS, tasks).await
    }

    // ===== Vaccinations =====

    pub async fn load_vaccinations(&self) -> Option<CachedData<Vec<Vaccination>>> {
        self.read_entry(keys::VACCINATIONS).await
    }

    pub async fn save_vaccinations(&self, vaccinations: &[Vaccination]) {
        self.cache(keys::VACCINATIONS, vaccinations).await
    }

    // ===== Checkups =====

    pub async fn load_checkups(&self) -> Option<CachedData<Vec<Checkup>>> {
        self.read_entry(keys::CHECKUPS).await
    }

    pub async fn save_checkups(&self, checkups: &[Checkup]) {
        self.cache(keys::CHECKUPS, checkups).await
    }

    // ===== Vet Directory =====

    pub async fn load_vets(
        &self,
        city: &str,
        animal_type: &str,
    ) -> Option<CachedData<Vec<Veterinarian>>> {
        self.read_entry(&keys::vets(city, animal_type)).await
    }

    pub async fn save_vets(&self, city: &str, animal_type: &str, vets: &[Veterinarian]) {
        self.cache(&keys::vets(city, animal_type), vets).await
    }

    // ===== Cache Age Information =====

    pub async fn cache_ages(&self) -> CacheAges {
        CacheAges {
            tasks: self.load_tasks().await.map(|c| c.age_display()),
            vaccinations: self.load_vaccinations().await.map(|c| c.age_display()),
            checkups: self.load_checkups().await.map(|c| c.age_display()),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub tasks: Option<String>,
    pub vaccinations: Option<String>,
    pub checkups: Option<String>,
}

impl CacheAges {
    pub fn display(age: &Option<String>) -> &str {
        age.as_deref().unwrap_or("never")
    }
}
