//! Keyed entity cache with TTL, durable persistence, and request dedup.
//!
//! One [`KeyedCache`] is created at application start and cloned into every
//! consumer. Clones share the same entries, pending-fetch registry, and event
//! channel, so deduplication holds across every caller in the process.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::FutureExt;
use hearth_core::{
    CacheConfig, CacheError, CacheKey, Clock, EntityId, EntityType, FetchError, HearthError,
    HearthResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::entry::{decode_value, encode_value, CacheEntry, PersistedEntry};
use super::events::CacheEvent;
use super::pending::{PendingRegistry, SharedFetch};
use super::stats::{CacheMetrics, CacheStats};
use crate::kv::KeyValueStore;

/// Process-wide keyed cache handle.
///
/// # Example
///
/// ```ignore
/// let cache = KeyedCache::open(store, Arc::new(SystemClock), CacheConfig::default())?;
///
/// let hero: Character = cache
///     .fetch(EntityType::Character, "hero-1", move || async move {
///         api.load_character("hero-1").await
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct KeyedCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    entries: RwLock<HashMap<CacheKey, CacheEntry<Value>>>,
    pending: PendingRegistry,
    events: broadcast::Sender<CacheEvent>,
    metrics: CacheMetrics,
}

impl KeyedCache {
    /// Create the cache and seed it from durable storage.
    ///
    /// Every record under the configured prefix is loaded, expired or not.
    /// Records that fail to parse are removed from storage and skipped.
    /// Fails before touching the store if `config` is invalid.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> HearthResult<Self> {
        config.validate()?;
        let entries = hydrate(store.as_ref(), &config.storage_prefix)?;
        let (events, _) = broadcast::channel(config.event_capacity);

        tracing::info!(
            entries = entries.len(),
            prefix = %config.storage_prefix,
            "Keyed cache loaded from durable storage"
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                config,
                entries: RwLock::new(entries),
                pending: PendingRegistry::default(),
                events,
                metrics: CacheMetrics::default(),
            }),
        })
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read the entry for a key without side effects.
    ///
    /// Stale entries are returned as-is; expiry only matters to `fetch`.
    pub fn get<T: DeserializeOwned>(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> HearthResult<Option<CacheEntry<T>>> {
        let key = CacheKey::new(entity_type, entity_id);
        let entries = self.inner.read_entries();
        entries.get(&key).map(|entry| entry.decode(&key)).transpose()
    }

    /// Overwrite the entry for a key using the default TTL.
    pub fn set<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        data: &T,
    ) -> HearthResult<()> {
        self.set_with_ttl(entity_type, entity_id, data, self.inner.config.default_ttl())
    }

    /// Overwrite the entry for a key, expiring `ttl` from now.
    ///
    /// Only serialization can fail; durable write failures are logged.
    pub fn set_with_ttl<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        data: &T,
        ttl: Duration,
    ) -> HearthResult<()> {
        let key = CacheKey::new(entity_type, entity_id);
        let value = encode_value(&key, data)?;
        let entry = CacheEntry::fresh(entity_type, value, self.inner.clock.now(), ttl);
        self.inner.store_entry(&key, entry);
        Ok(())
    }

    /// Delete the entry and its durable record. Removing an absent key is a no-op.
    pub fn remove(&self, entity_type: EntityType, entity_id: &str) {
        let key = CacheKey::new(entity_type, entity_id);
        let existed = self.inner.write_entries().remove(&key).is_some();
        self.inner.unpersist(&key);
        if existed {
            tracing::debug!(key = %key, "Cache entry removed");
            self.inner.notify(CacheEvent::Removed(key));
        }
    }

    /// True while a fetch for the key is in flight.
    pub fn is_loading(&self, entity_type: EntityType, entity_id: &str) -> bool {
        let key = CacheKey::new(entity_type, entity_id);
        self.inner
            .read_entries()
            .get(&key)
            .map(|entry| entry.loading)
            .unwrap_or(false)
    }

    /// Last fetch error recorded for the key.
    pub fn get_error(&self, entity_type: EntityType, entity_id: &str) -> Option<HearthError> {
        let key = CacheKey::new(entity_type, entity_id);
        self.inner
            .read_entries()
            .get(&key)
            .and_then(|entry| entry.error.clone())
    }

    /// Return the cached value if fresh, otherwise fetch it using the default TTL.
    pub async fn fetch<T, F, Fut>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        fetch_fn: F,
    ) -> HearthResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HearthResult<T>> + Send + 'static,
    {
        let ttl = self.inner.config.default_ttl();
        self.fetch_with_ttl(entity_type, entity_id, ttl, fetch_fn)
            .await
    }

    /// Return the cached value if fresh, otherwise fetch it.
    ///
    /// Concurrent callers for the same key share one invocation of
    /// `fetch_fn` and all observe its outcome. The fetch runs on its own task,
    /// so it settles (and updates the entry) even if every caller is dropped.
    /// Failures are recorded on the entry and never retried here.
    pub async fn fetch_with_ttl<T, F, Fut>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        ttl: Duration,
        fetch_fn: F,
    ) -> HearthResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HearthResult<T>> + Send + 'static,
    {
        let key = CacheKey::new(entity_type, entity_id);

        let shared = {
            let mut inflight = self.inner.pending.lock();

            if let Some(value) = self.inner.fresh_value(&key) {
                drop(inflight);
                self.inner.metrics.record_hit();
                tracing::debug!(key = %key, "Cache hit");
                return decode_value(&key, value);
            }

            match inflight.get(&key) {
                Some(existing) => {
                    self.inner.metrics.record_join();
                    tracing::debug!(key = %key, "Joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    self.inner.metrics.record_miss();
                    tracing::debug!(key = %key, "Cache miss, launching fetch");
                    self.inner.mark_loading(&key);
                    let fetch = launch(Arc::clone(&self.inner), key.clone(), ttl, fetch_fn);
                    inflight.insert(key.clone(), fetch.clone());
                    fetch
                }
            }
        };

        let value = shared.await?;
        decode_value(&key, value)
    }

    /// Remove every entry of `entity_type`, or every entry when `None`.
    ///
    /// Durable records under the matching prefix are removed too; keys
    /// outside the cache prefix are never touched. Returns the number of
    /// in-memory entries removed.
    pub fn clear_cache(&self, entity_type: Option<EntityType>) -> u64 {
        let removed = {
            let mut entries = self.inner.write_entries();
            let before = entries.len();
            entries.retain(|key, _| entity_type.is_some_and(|t| t != key.entity_type));
            before - entries.len()
        };

        let prefix = match entity_type {
            Some(t) => CacheKey::type_prefix(&self.inner.config.storage_prefix, t),
            None => self.inner.config.storage_prefix.clone(),
        };
        match self.inner.store.keys_with_prefix(&prefix) {
            Ok(keys) => {
                for raw_key in keys {
                    if let Err(e) = self.inner.store.remove_item(&raw_key) {
                        tracing::warn!(key = %raw_key, error = %e, "Failed to remove durable cache record");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Failed to list durable cache records");
            }
        }

        tracing::debug!(entity_type = ?entity_type, removed, "Cache cleared");
        self.inner.notify(CacheEvent::Cleared(entity_type));
        removed as u64
    }

    /// Subscribe to cache change events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entry_count = self.len() as u64;
        self.inner.metrics.snapshot(entry_count)
    }

    /// Number of entries in memory.
    pub fn len(&self) -> usize {
        self.inner.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently in memory, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.inner.read_entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for KeyedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache")
            .field("prefix", &self.inner.config.storage_prefix)
            .field("entries", &self.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl CacheInner {
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry<Value>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry<Value>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: CacheEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn fresh_value(&self, key: &CacheKey) -> Option<Value> {
        let now = self.clock.now();
        self.read_entries()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .and_then(|entry| entry.data.clone())
    }

    fn mark_loading(&self, key: &CacheKey) {
        let now = self.clock.now();
        {
            let mut entries = self.write_entries();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::loading(key.entity_type, now));
            entry.loading = true;
            entry.error = None;
        }
        self.notify(CacheEvent::Loading(key.clone()));
    }

    /// Write a settled entry to memory and durable storage.
    fn store_entry(&self, key: &CacheKey, entry: CacheEntry<Value>) {
        let record = PersistedEntry::from_entry(&entry);
        self.write_entries().insert(key.clone(), entry);
        if let Some(record) = record {
            self.persist(key, &record);
        }
        self.notify(CacheEvent::Updated(key.clone()));
    }

    fn persist(&self, key: &CacheKey, record: &PersistedEntry) {
        let storage_key = key.storage_key(&self.config.storage_prefix);
        let result = serde_json::to_string(record)
            .map_err(|e| {
                HearthError::from(CacheError::Serialization {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .and_then(|raw| self.store.set_item(&storage_key, &raw));
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Failed to persist cache entry");
        }
    }

    fn unpersist(&self, key: &CacheKey) {
        let storage_key = key.storage_key(&self.config.storage_prefix);
        if let Err(e) = self.store.remove_item(&storage_key) {
            tracing::warn!(key = %key, error = %e, "Failed to remove durable cache record");
        }
    }

    /// Settle a fetch: record its outcome, then release the pending slot.
    fn complete_fetch(&self, key: &CacheKey, ttl: Duration, outcome: &HearthResult<Value>) {
        let now = self.clock.now();
        match outcome {
            Ok(value) => {
                let entry = CacheEntry::fresh(key.entity_type, value.clone(), now, ttl);
                self.store_entry(key, entry);
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Fetch settled");
            }
            Err(err) => {
                self.metrics.record_failure();
                {
                    let mut entries = self.write_entries();
                    let entry = entries
                        .entry(key.clone())
                        .or_insert_with(|| CacheEntry::loading(key.entity_type, now));
                    entry.loading = false;
                    entry.error = Some(err.clone());
                }
                tracing::warn!(key = %key, error = %err, "Fetch failed");
                self.notify(CacheEvent::Failed(key.clone()));
            }
        }
        self.pending.remove(key);
    }
}

/// Spawn the fetch and wrap its join handle in a shareable future.
fn launch<T, F, Fut>(inner: Arc<CacheInner>, key: CacheKey, ttl: Duration, fetch_fn: F) -> SharedFetch
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = HearthResult<T>> + Send + 'static,
{
    let task_inner = Arc::clone(&inner);
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
        let outcome = match AssertUnwindSafe(async move { fetch_fn().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(data)) => encode_value(&task_key, &data),
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(FetchError::Panicked {
                key: task_key.clone(),
                reason: panic_message(panic.as_ref()),
            }
            .into()),
        };
        task_inner.complete_fetch(&task_key, ttl, &outcome);
        outcome
    });

    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let outcome: HearthResult<Value> = Err(FetchError::Aborted {
                    key: key.clone(),
                    reason: join_err.to_string(),
                }
                .into());
                inner.complete_fetch(&key, ttl, &outcome);
                outcome
            }
        }
    }
    .boxed()
    .shared()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Load every parsable record under `prefix`, dropping the rest.
fn hydrate(
    store: &dyn KeyValueStore,
    prefix: &str,
) -> HearthResult<HashMap<CacheKey, CacheEntry<Value>>> {
    let mut entries = HashMap::new();

    for raw_key in store.keys_with_prefix(prefix)? {
        let Some(key) = CacheKey::from_storage_key(prefix, &raw_key) else {
            drop_record(store, &raw_key, "unrecognised key");
            continue;
        };

        let raw = match store.get_item(&raw_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(key = %raw_key, error = %e, "Failed to read durable cache record");
                continue;
            }
        };

        match PersistedEntry::parse(&key, &raw) {
            Ok(record) => {
                entries.insert(key, record.into_entry());
            }
            Err(reason) => drop_record(store, &raw_key, &reason),
        }
    }

    Ok(entries)
}

fn drop_record(store: &dyn KeyValueStore, raw_key: &str, reason: &str) {
    tracing::warn!(key = %raw_key, reason, "Dropping unparsable cache record");
    if let Err(e) = store.remove_item(raw_key) {
        tracing::warn!(key = %raw_key, error = %e, "Failed to remove unparsable cache record");
    }
}
