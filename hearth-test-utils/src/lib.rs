//! Hearth Test Utilities
//!
//! Shared test infrastructure for the hearth workspace:
//! - Controllable clock and fake collaborators (fetchers, pollers, stores)
//! - Proptest generators for keys and entity types
//! - Fixtures for seeded durable storage
//! - Assertions for hearth error and job states

pub use hearth_core::{
    CacheConfig, CacheError, CacheKey, Clock, ConfigError, EntityType, FetchError, HearthError,
    HearthResult, JobError, StorageError, Timestamp,
};
pub use hearth_jobs::{GenerationState, JobStatus, StatusPoller, StatusResponse, SubmitResponse};
pub use hearth_storage::{InMemoryKeyValueStore, KeyValueStore, KeyedCache, PERSISTED_VERSION};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Clock starting at [`fixtures::t0`].
    pub fn at_t0() -> Arc<Self> {
        Self::new(fixtures::t0())
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// FAKE COLLABORATORS
// ============================================================================

/// Boxed future returned by [`CountingFetcher::fetch_fn`].
pub type FetchFuture<T> = Pin<Box<dyn Future<Output = HearthResult<T>> + Send + 'static>>;

/// Fetch function factory that counts invocations.
///
/// Every closure handed out shares one counter, so a test can assert how
/// many times the cache actually ran a fetch.
#[derive(Debug, Clone)]
pub struct CountingFetcher<T> {
    outcome: HearthResult<T>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl<T: Clone + Send + 'static> CountingFetcher<T> {
    pub fn ok(value: T) -> Self {
        Self {
            outcome: Ok(value),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            outcome: Err(HearthError::fetch(reason)),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep for `delay` (tokio time) before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fetch_fn(&self) -> impl FnOnce() -> FetchFuture<T> + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let outcome = self.outcome.clone();
        let delay = self.delay;
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            })
        }
    }
}

/// Status poller that replays a script.
///
/// Once the script is exhausted every request reports step `running`.
#[derive(Debug)]
pub struct ScriptedStatusPoller<T> {
    responses: Mutex<VecDeque<HearthResult<StatusResponse<T>>>>,
    polled: Mutex<Vec<String>>,
}

impl<T> ScriptedStatusPoller<T> {
    pub fn new(responses: impl IntoIterator<Item = HearthResult<StatusResponse<T>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            polled: Mutex::new(Vec::new()),
        }
    }

    /// Poller that never reaches a result.
    pub fn always_running() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.polled.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Job ids passed to each status request, in order.
    pub fn polled_ids(&self) -> Vec<String> {
        self.polled.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl<T> StatusPoller<T> for ScriptedStatusPoller<T>
where
    T: Send + Sync + 'static,
{
    async fn poll_status(&self, job_id: &str) -> HearthResult<StatusResponse<T>> {
        self.polled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job_id.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(StatusResponse::running("running")))
    }
}

/// Store whose writes and deletes always fail. Reads see an empty store.
#[derive(Debug, Default)]
pub struct FailingKeyValueStore {
    write_attempts: AtomicUsize,
}

impl FailingKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for FailingKeyValueStore {
    fn get_item(&self, _key: &str) -> HearthResult<Option<String>> {
        Ok(None)
    }

    fn set_item(&self, key: &str, _value: &str) -> HearthResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Write {
            key: key.to_string(),
            reason: "quota exceeded".to_string(),
        }
        .into())
    }

    fn remove_item(&self, key: &str) -> HearthResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Delete {
            key: key.to_string(),
            reason: "quota exceeded".to_string(),
        }
        .into())
    }

    fn keys(&self) -> HearthResult<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        prop::sample::select(EntityType::ALL.to_vec())
    }

    /// Opaque ids, including separators and other punctuation.
    pub fn arb_entity_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:_./-]{1,24}"
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_entity_type(), arb_entity_id()).prop_map(|(t, id)| CacheKey::new(t, id))
    }

    /// Distinct keys, up to `max` of them.
    pub fn arb_cache_keys(max: usize) -> impl Strategy<Value = Vec<CacheKey>> {
        prop::collection::btree_set(arb_cache_key(), 1..=max)
            .prop_map(|keys| keys.into_iter().collect())
    }

    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..86_400).prop_map(Duration::from_secs)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Domain records and seeded stores.

    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TestCharacter {
        pub id: String,
        pub name: String,
        pub level: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TestItem {
        pub id: String,
        pub name: String,
        pub weight: u32,
    }

    pub fn character(id: &str, name: &str) -> TestCharacter {
        TestCharacter {
            id: id.to_string(),
            name: name.to_string(),
            level: 1,
        }
    }

    pub fn item(id: &str, name: &str) -> TestItem {
        TestItem {
            id: id.to_string(),
            name: name.to_string(),
            weight: 1,
        }
    }

    /// Fixed start time for clocks.
    pub fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn cache_config() -> CacheConfig {
        CacheConfig::default()
    }

    /// Storage key for `key` under the default prefix.
    pub fn storage_key(key: &CacheKey) -> String {
        key.storage_key(&cache_config().storage_prefix)
    }

    /// A durable record in the current format.
    pub fn persisted_record<T: Serialize>(
        entity_type: EntityType,
        data: &T,
        expires_at: Timestamp,
    ) -> String {
        serde_json::json!({
            "version": PERSISTED_VERSION,
            "data": data,
            "expires_at": expires_at,
            "entity_type": entity_type,
        })
        .to_string()
    }

    /// In-memory store pre-populated with raw `(storage key, value)` pairs.
    pub fn seeded_store(
        items: impl IntoIterator<Item = (String, String)>,
    ) -> Arc<InMemoryKeyValueStore> {
        Arc::new(InMemoryKeyValueStore::with_items(items))
    }

    /// Cache over `store` with the default config.
    pub fn open_cache(store: Arc<dyn KeyValueStore>, clock: Arc<ManualClock>) -> KeyedCache {
        match KeyedCache::open(store, clock, cache_config()) {
            Ok(cache) => cache,
            Err(e) => panic!("cache should open: {}", e),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for hearth results and tracker states.

    use super::*;

    #[track_caller]
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &HearthResult<T>, reason: &str) {
        match result {
            Err(HearthError::Fetch(FetchError::Failed { reason: actual })) => {
                assert_eq!(actual, reason, "Wrong fetch failure reason");
            }
            other => panic!("Expected fetch failure '{}', got: {:?}", reason, other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &HearthResult<T>) {
        match result {
            Err(HearthError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_complete<T>(state: &GenerationState<T>, expected: &T)
    where
        T: std::fmt::Debug + PartialEq,
    {
        assert_eq!(state.status, JobStatus::Complete, "state: {:?}", state);
        assert_eq!(state.result.as_ref(), Some(expected));
        assert!(state.error.is_none());
        assert!(!state.is_generating());
    }

    #[track_caller]
    pub fn assert_failed<T: std::fmt::Debug>(state: &GenerationState<T>, message: &str) {
        assert_eq!(state.status, JobStatus::Failed, "state: {:?}", state);
        assert_eq!(state.error.as_deref(), Some(message));
        assert!(!state.is_generating());
    }
}
