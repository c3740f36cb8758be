use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification permission not granted")]
    PermissionDenied,

    #[error("Local notifications are not supported on this platform")]
    Unsupported,

    #[error("Notification backend error: {0}")]
    Backend(String),
}

/// Delivery tier. Each maps onto one configured channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Default,
    Urgent,
}

impl Priority {
    pub fn channel_id(&self) -> &'static str {
        match self {
            Priority::Default => "default",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub priority: Priority,
}

pub const CHANNELS: [NotificationChannel; 2] = [
    NotificationChannel {
        id: "default",
        name: "Farm reminders",
        description: "Task and checkup reminders",
        priority: Priority::Default,
    },
    NotificationChannel {
        id: "urgent",
        name: "Urgent alerts",
        description: "Vaccinations due, disease risk, outbreaks and sensor alarms",
        priority: Priority::Urgent,
    },
];

/// A notification registered with the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReminder {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub fires_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub priority: Priority,
}

/// Platform local-notification API.
///
/// `schedule` is an upsert keyed by `identifier`. `present` shows a
/// notification right away and is never deduplicated.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn request_permission(&self) -> bool;

    async fn configure_channel(&self, channel: &NotificationChannel) -> Result<(), NotifyError>;

    async fn schedule(&self, reminder: ScheduledReminder) -> Result<(), NotifyError>;

    async fn present(&self, reminder: ScheduledReminder) -> Result<(), NotifyError>;

    async fn cancel(&self, identifier: &str) -> Result<(), NotifyError>;

    async fn cancel_all(&self) -> Result<(), NotifyError>;
}
