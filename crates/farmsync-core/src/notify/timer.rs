use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::notifier::{NotificationChannel, Notifier, NotifyError, Priority, ScheduledReminder};

/// A notification that reached the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveredNotification {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveredNotification {
    fn from_reminder(reminder: ScheduledReminder) -> Self {
        Self {
            identifier: reminder.identifier,
            title: reminder.title,
            body: reminder.body,
            priority: reminder.priority,
            payload: reminder.payload,
            delivered_at: Utc::now(),
        }
    }
}

struct Timer {
    generation: u64,
    reminder: ScheduledReminder,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<String, Timer>>>;

fn lock(timers: &Timers) -> MutexGuard<'_, HashMap<String, Timer>> {
    timers.lock().unwrap_or_else(|p| p.into_inner())
}

/// In-process notification backend.
///
/// Each scheduled reminder is a tokio task sleeping until `fires_at`;
/// delivery means sending a `DeliveredNotification` down the channel
/// returned by `new`. Re-scheduling an identifier aborts its old task.
/// Timers do not survive the process.
pub struct TimerNotifier {
    permission: bool,
    timers: Timers,
    generation: AtomicU64,
    delivered: mpsc::UnboundedSender<DeliveredNotification>,
}

impl TimerNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveredNotification>) {
        Self::with_permission(true)
    }

    /// Backend whose permission prompt answers `permission`.
    pub fn with_permission(
        permission: bool,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveredNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            permission,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            delivered: tx,
        };
        (notifier, rx)
    }

    /// Reminders waiting to fire, soonest first.
    pub fn pending(&self) -> Vec<ScheduledReminder> {
        let mut pending: Vec<ScheduledReminder> =
            lock(&self.timers).values().map(|t| t.reminder.clone()).collect();
        pending.sort_by_key(|r| r.fires_at);
        pending
    }

    pub fn is_scheduled(&self, identifier: &str) -> bool {
        lock(&self.timers).contains_key(identifier)
    }
}

impl Drop for TimerNotifier {
    fn drop(&mut self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.handle.abort();
        }
    }
}

#[async_trait]
impl Notifier for TimerNotifier {
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_permission(&self) -> bool {
        self.permission
    }

    async fn configure_channel(&self, channel: &NotificationChannel) -> Result<(), NotifyError> {
        debug!(channel = channel.id, "Notification channel ready");
        Ok(())
    }

    async fn schedule(&self, reminder: ScheduledReminder) -> Result<(), NotifyError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let delay = (reminder.fires_at - Utc::now())
            .to_std()
            .unwrap_or_default();

        let identifier = reminder.identifier.clone();
        let task_reminder = reminder.clone();
        let timers = self.timers.clone();
        let tx = self.delivered.clone();

        // Holding the lock across spawn keeps the task from finishing before
        // its entry exists.
        let mut guard = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&timers);
                match map.get(&task_reminder.identifier) {
                    Some(t) if t.generation == generation => {
                        map.remove(&task_reminder.identifier);
                    }
                    _ => return,
                }
            }
            info!(id = %task_reminder.identifier, "Delivering reminder");
            let _ = tx.send(DeliveredNotification::from_reminder(task_reminder));
        });

        if let Some(old) = guard.insert(
            identifier.clone(),
            Timer {
                generation,
                reminder,
                handle,
            },
        ) {
            old.handle.abort();
            debug!(id = %identifier, "Replaced scheduled reminder");
        }
        Ok(())
    }

    async fn present(&self, reminder: ScheduledReminder) -> Result<(), NotifyError> {
        info!(id = %reminder.identifier, "Presenting notification");
        self.delivered
            .send(DeliveredNotification::from_reminder(reminder))
            .map_err(|_| NotifyError::Backend("delivery channel closed".into()))
    }

    async fn cancel(&self, identifier: &str) -> Result<(), NotifyError> {
        if let Some(timer) = lock(&self.timers).remove(identifier) {
            timer.handle.abort();
            debug!(id = identifier, "Cancelled reminder");
        }
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), NotifyError> {
        let mut timers = lock(&self.timers);
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        debug!(count, "Cancelled all reminders");
        Ok(())
    }
}
