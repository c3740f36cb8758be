//! Local reminders and alerts.
//!
//! - `NotificationScheduler`: turns tasks, vaccinations and checkups into
//!   time-triggered reminders, plus immediate alerts
//! - `Notifier`: the platform notification backend
//! - `TimerNotifier`: in-process backend built on tokio timers

pub mod notifier;
pub mod scheduler;
pub mod timer;

pub use notifier::{NotificationChannel, Notifier, NotifyError, Priority, ScheduledReminder, CHANNELS};
pub use scheduler::{
    NotificationScheduler, RefreshReport, CHECKUP_LEAD_HOURS, DAILY_SUMMARY_ID,
    VACCINATION_LEAD_HOURS,
};
pub use timer::{DeliveredNotification, TimerNotifier};
