//! Offline-first sync and local reminders for the farm app.
//!
//! Reads go through `service::FarmData`, which serves cached data when the
//! API is unreachable. Mutations are applied to the cache immediately and
//! queued; the `sync::SyncEngine` replays the queue whenever the
//! `network::ReachabilityMonitor` reports a reconnect. The
//! `notify::NotificationScheduler` registers local reminders for tasks,
//! vaccinations and checkups regardless of connectivity.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod network;
pub mod notify;
pub mod queue;
pub mod service;
pub mod store;
pub mod sync;

pub use config::Config;
pub use service::{DataSource, FarmData, Fetched, SubmitReceipt};
