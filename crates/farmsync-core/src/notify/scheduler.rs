use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::notifier::{Notifier, Priority, ScheduledReminder, CHANNELS};
use crate::models::{Checkup, Task, TaskPriority, Vaccination};

// ============================================================================
// Lead Times
// ============================================================================

/// Vaccination reminders fire this long before the due date.
pub const VACCINATION_LEAD_HOURS: i64 = 24;

/// Checkup reminders fire this long before the appointment.
pub const CHECKUP_LEAD_HOURS: i64 = 1;

pub const DAILY_SUMMARY_ID: &str = "daily_summary";

/// How many reminders a `refresh_reminders` pass registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub tasks: usize,
    pub vaccinations: usize,
    pub checkups: usize,
}

impl RefreshReport {
    pub fn total(&self) -> usize {
        self.tasks + self.vaccinations + self.checkups
    }
}

/// Registers local reminders derived from farm entities.
///
/// Every method except `initialize` is a silent no-op until `initialize`
/// has succeeded. Backend failures are logged and absorbed.
pub struct NotificationScheduler {
    notifier: Arc<dyn Notifier>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl NotificationScheduler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Request permission and configure channels. Returns whether the
    /// scheduler is usable. Safe to call repeatedly.
    pub async fn initialize(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return true;
        }

        if !self.notifier.is_supported() {
            debug!("Local notifications unsupported, reminders disabled");
            return false;
        }
        if !self.notifier.request_permission().await {
            warn!("Notification permission denied, reminders disabled");
            return false;
        }

        for channel in &CHANNELS {
            if let Err(e) = self.notifier.configure_channel(channel).await {
                warn!(channel = channel.id, error = %e, "Failed to configure notification channel");
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        info!("Notification scheduler ready");
        true
    }

    /// Cancel everything and return to the uninitialized state.
    pub async fn teardown(&self) {
        let _guard = self.init_lock.lock().await;
        if self.ready.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.notifier.cancel_all().await {
                warn!(error = %e, "Failed to cancel notifications on teardown");
            }
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Upsert a reminder. A `fires_at` that is not in the future is
    /// ignored. Returns whether the reminder was registered.
    pub async fn schedule_reminder(
        &self,
        identifier: &str,
        title: &str,
        body: &str,
        fires_at: DateTime<Utc>,
        payload: Value,
        priority: Priority,
    ) -> bool {
        if !self.is_ready() {
            return false;
        }
        if fires_at <= Utc::now() {
            debug!(id = identifier, fires_at = %fires_at, "Reminder time already passed, skipping");
            return false;
        }

        let reminder = ScheduledReminder {
            identifier: identifier.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            fires_at,
            payload,
            priority,
        };
        match self.notifier.schedule(reminder).await {
            Ok(()) => {
                debug!(id = identifier, fires_at = %fires_at, "Scheduled reminder");
                true
            }
            Err(e) => {
                warn!(id = identifier, error = %e, "Failed to schedule reminder");
                false
            }
        }
    }

    pub async fn cancel(&self, identifier: &str) {
        if !self.is_ready() {
            return;
        }
        if let Err(e) = self.notifier.cancel(identifier).await {
            warn!(id = identifier, error = %e, "Failed to cancel reminder");
        }
    }

    pub async fn cancel_all(&self) {
        if !self.is_ready() {
            return;
        }
        if let Err(e) = self.notifier.cancel_all().await {
            warn!(error = %e, "Failed to cancel reminders");
        }
    }

    // ========================================================================
    // Entity Reminders
    // ========================================================================

    pub async fn schedule_vaccination_reminder(&self, vaccination: &Vaccination) -> bool {
        let fires_at = vaccination.due_date - Duration::hours(VACCINATION_LEAD_HOURS);
        self.schedule_reminder(
            &format!("vaccination_{}", vaccination.id),
            "Vaccination due tomorrow",
            &format!(
                "{} is due for {}",
                vaccination.animal_name, vaccination.vaccine_name
            ),
            fires_at,
            json!({ "type": "vaccination", "id": vaccination.id }),
            Priority::Urgent,
        )
        .await
    }

    pub async fn schedule_checkup_reminder(&self, checkup: &Checkup) -> bool {
        let fires_at = checkup.scheduled_at - Duration::hours(CHECKUP_LEAD_HOURS);
        let mut body = format!(
            "{}: {}",
            checkup.animal_name,
            checkup.reason.as_deref().unwrap_or("routine checkup")
        );
        if let Some(vet) = &checkup.vet_name {
            body.push_str(&format!(" with {}", vet));
        }
        self.schedule_reminder(
            &format!("checkup_{}", checkup.id),
            "Vet checkup in 1 hour",
            &body,
            fires_at,
            json!({ "type": "checkup", "id": checkup.id }),
            Priority::Default,
        )
        .await
    }

    /// Remind `lead_minutes` before the task is due. Tasks without a due
    /// date and completed tasks are skipped.
    pub async fn schedule_task_reminder(&self, task: &Task, lead_minutes: i64) -> bool {
        let Some(due) = task.due_date else {
            return false;
        };
        if task.is_completed() {
            return false;
        }

        let priority = if task.priority == Some(TaskPriority::High) {
            Priority::Urgent
        } else {
            Priority::Default
        };
        self.schedule_reminder(
            &format!("task_{}", task.id),
            &format!("Task due in {} min", lead_minutes),
            &task.task_name,
            due - Duration::minutes(lead_minutes),
            json!({ "type": "task", "id": task.id }),
            priority,
        )
        .await
    }

    /// Re-register reminders for everything just fetched.
    pub async fn refresh_reminders(
        &self,
        tasks: &[Task],
        vaccinations: &[Vaccination],
        checkups: &[Checkup],
        task_lead_minutes: i64,
    ) -> RefreshReport {
        if !self.is_ready() {
            return RefreshReport::default();
        }
        let scheduled = |results: Vec<bool>| results.into_iter().filter(|ok| *ok).count();
        let report = RefreshReport {
            tasks: scheduled(
                join_all(tasks.iter().map(|t| self.schedule_task_reminder(t, task_lead_minutes)))
                    .await,
            ),
            vaccinations: scheduled(
                join_all(vaccinations.iter().map(|v| self.schedule_vaccination_reminder(v))).await,
            ),
            checkups: scheduled(
                join_all(checkups.iter().map(|c| self.schedule_checkup_reminder(c))).await,
            ),
        };
        debug!(
            tasks = report.tasks,
            vaccinations = report.vaccinations,
            checkups = report.checkups,
            "Refreshed reminders"
        );
        report
    }

    /// Schedule the daily summary for the next local occurrence of
    /// `hour:minute`.
    pub async fn schedule_daily_summary(&self, hour: u32, minute: u32) -> bool {
        let Some(fires_at) = next_local_occurrence(hour, minute, Local::now()) else {
            warn!(hour, minute, "Invalid daily summary time");
            return false;
        };
        self.schedule_reminder(
            DAILY_SUMMARY_ID,
            "Daily farm summary",
            "Check today's tasks and animal health schedule.",
            fires_at,
            json!({ "type": "daily_summary" }),
            Priority::Default,
        )
        .await
    }

    // ========================================================================
    // Immediate Alerts
    // ========================================================================

    pub async fn notify_risk_alert(&self, level: &str, message: &str) -> bool {
        let priority = match level.to_ascii_lowercase().as_str() {
            "high" | "critical" => Priority::Urgent,
            _ => Priority::Default,
        };
        self.present(
            format!("risk_{}", Utc::now().timestamp_millis()),
            format!("Disease risk: {}", level),
            message.to_string(),
            json!({ "type": "risk", "level": level }),
            priority,
        )
        .await
    }

    pub async fn notify_outbreak_alert(&self, disease: &str, region: &str) -> bool {
        self.present(
            format!("outbreak_{}", Utc::now().timestamp_millis()),
            "Outbreak alert".to_string(),
            format!("{} reported near {}", disease, region),
            json!({ "type": "outbreak", "disease": disease, "region": region }),
            Priority::Urgent,
        )
        .await
    }

    pub async fn notify_sensor_alert(&self, sensor_type: &str, reading: f64, threshold: f64) -> bool {
        self.present(
            format!("iot_{}_{}", sensor_type, Utc::now().timestamp_millis()),
            format!("Sensor alert: {}", sensor_type),
            format!("Reading {} exceeded threshold {}", reading, threshold),
            json!({
                "type": "iot",
                "sensor_type": sensor_type,
                "reading": reading,
                "threshold": threshold,
            }),
            Priority::Urgent,
        )
        .await
    }

    async fn present(
        &self,
        identifier: String,
        title: String,
        body: String,
        payload: Value,
        priority: Priority,
    ) -> bool {
        if !self.is_ready() {
            return false;
        }
        let reminder = ScheduledReminder {
            identifier,
            title,
            body,
            fires_at: Utc::now(),
            payload,
            priority,
        };
        let id = reminder.identifier.clone();
        match self.notifier.present(reminder).await {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to present alert");
                false
            }
        }
    }
}

/// Next instant strictly after `now` at local `hour:minute`.
fn next_local_occurrence(hour: u32, minute: u32, now: DateTime<Local>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let mut date = now.date_naive();
    // Two days covers a time skipped by a DST jump today.
    for _ in 0..3 {
        if let Some(candidate) = date.and_time(time).and_local_timezone(Local).earliest() {
            if candidate > now {
                return Some(candidate.with_timezone(&Utc));
            }
        }
        date = date.succ_opt()?;
    }
    None
}
