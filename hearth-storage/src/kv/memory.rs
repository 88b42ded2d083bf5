//! In-memory key-value store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use hearth_core::{HearthResult, StorageError};

use super::KeyValueStore;

/// `BTreeMap`-backed store. Keys iterate in sorted order.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    items: RwLock<BTreeMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `items`.
    pub fn with_items<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            items: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get_item(&self, key: &str) -> HearthResult<Option<String>> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> HearthResult<()> {
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> HearthResult<()> {
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> HearthResult<Vec<String>> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.keys().cloned().collect())
    }

    fn keys_with_prefix(&self, prefix: &str) -> HearthResult<Vec<String>> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
