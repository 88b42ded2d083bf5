//! Durable key-value storage port.
//!
//! The cache owns every key under its namespace prefix and talks to durable
//! storage only through [`KeyValueStore`]. The store is synchronous; callers
//! treat writes as fire-and-forget.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbKeyValueStore;
pub use memory::InMemoryKeyValueStore;

use std::sync::Arc;

use hearth_core::{HearthResult, StorageBackend, StorageConfig};

/// Synchronous string key-value store.
///
/// Implementations must be safe to share between threads. `remove_item` is
/// idempotent: removing an absent key succeeds.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get_item(&self, key: &str) -> HearthResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> HearthResult<()>;

    /// Remove `key`.
    fn remove_item(&self, key: &str) -> HearthResult<()>;

    /// List every key currently in the store.
    fn keys(&self) -> HearthResult<Vec<String>>;

    /// List keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> HearthResult<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Open the store selected by the storage configuration.
pub fn open_store(config: &StorageConfig) -> HearthResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryKeyValueStore::new())),
        StorageBackend::Lmdb => {
            let path = config.path.clone().unwrap_or_default();
            let store = LmdbKeyValueStore::open(&path, config.max_size_mb)?;
            Ok(Arc::new(store))
        }
    }
}
