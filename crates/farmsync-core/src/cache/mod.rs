//! Local caching module for offline data access.
//!
//! `CacheManager` stores one snapshot per domain collection (tasks,
//! vaccinations, checkups, vet directory pages) in a `{data, timestamp}`
//! envelope. Snapshots are replaced wholesale on every successful fetch and
//! read back when the network is unavailable.

pub mod manager;

pub use manager::{CacheAges, CacheManager, CachedData};
