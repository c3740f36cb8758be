//! Queue draining against the remote API.

pub mod engine;

pub use engine::{
    DrainReport, ItemOutcome, SyncConfig, SyncEngine, SyncStatus, ITEM_DELAY_MS, MAX_RETRIES,
};
