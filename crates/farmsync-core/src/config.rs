//! Application configuration management.
//!
//! Configuration is stored at `~/.config/farmsync/config.json`; the offline
//! store lives under the platform data directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::sync::SyncConfig;

/// Application name used for config/data directory paths
const APP_NAME: &str = "farmsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Environment overrides, read by `apply_env`.
pub const ENV_API_BASE: &str = "FARMSYNC_API_BASE";
pub const ENV_TOKEN: &str = "FARMSYNC_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub task_reminder_lead_minutes: i64,
    pub sync_item_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub probe_interval_secs: u64,
    pub daily_summary: Option<DailySummary>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            task_reminder_lead_minutes: 30,
            sync_item_delay_ms: crate::sync::ITEM_DELAY_MS,
            request_timeout_secs: crate::api::DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_interval_secs: 10,
            daily_summary: None,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory backing the offline `FileStore`.
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `FARMSYNC_API_BASE` if set.
    pub fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(ENV_API_BASE) {
            if !base.trim().is_empty() {
                self.api_base = base.trim().to_string();
            }
        }
    }

    /// Token from `FARMSYNC_TOKEN`, if set and non-empty.
    pub fn env_token() -> Option<String> {
        std::env::var(ENV_TOKEN).ok().filter(|t| !t.trim().is_empty())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            item_delay: Duration::from_millis(self.sync_item_delay_ms),
            ..SyncConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.task_reminder_lead_minutes, 30);
        assert_eq!(config.sync_item_delay_ms, 500);
        assert_eq!(config.request_timeout_secs, 15);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_base":"https://farm.example/api","daily_summary":{"hour":6,"minute":15}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base, "https://farm.example/api");
        assert_eq!(config.daily_summary, Some(DailySummary { hour: 6, minute: 15 }));
        assert_eq!(config.probe_interval_secs, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            last_username: Some("wanjiru".to_string()),
            sync_item_delay_ms: 0,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.sync_config().item_delay.is_zero());
    }
}
