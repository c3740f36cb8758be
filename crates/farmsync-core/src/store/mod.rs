//! Device-local key-value storage.
//!
//! Every other component persists through the `KeyValueStore` trait, one
//! JSON string per key. Two backends are provided:
//!
//! - `FileStore`: one file per key under a data directory, survives restarts
//! - `MemoryStore`: process memory only, used for tests and throwaway sessions
//!
//! Keys are owned by the component that writes them (see `keys`), so no
//! backend needs cross-key transactions.

pub mod file;
pub mod keys;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable string-keyed storage.
///
/// Values are opaque strings (JSON in practice). A missing key is `Ok(None)`,
/// never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// All keys currently present, in no particular order.
    async fn keys(&self) -> StoreResult<Vec<String>>;
}
