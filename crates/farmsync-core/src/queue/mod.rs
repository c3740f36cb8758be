//! Persistent queue of mutations awaiting delivery to the server.
//!
//! Items are appended by the farm data service whenever the user changes
//! something, and removed by the sync engine once the server accepts them or
//! their retries are exhausted.

pub mod item;
pub mod mutation;
pub mod sync_queue;

pub use item::{EntityType, HttpMethod, SyncAction, SyncQueueItem};
pub use mutation::{CheckupMutation, Mutation, TaskMutation, VaccinationMutation};
pub use sync_queue::SyncQueue;
