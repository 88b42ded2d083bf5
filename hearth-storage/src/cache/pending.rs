//! Registry of in-flight fetches, keyed by cache key.
//!
//! Holding the registry lock across "look up, else register and launch" is
//! what guarantees at most one concurrent fetch per key.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use hearth_core::{CacheKey, HearthResult};
use serde_json::Value;

/// A fetch shared by every caller waiting on the same key.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, HearthResult<Value>>>;

#[derive(Default)]
pub(crate) struct PendingRegistry {
    inflight: Mutex<HashMap<CacheKey, SharedFetch>>,
}

impl PendingRegistry {
    /// Lock the registry for a check-and-insert sequence.
    ///
    /// The guard must never be held across an await point.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, SharedFetch>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn remove(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use hearth_core::EntityType;

    #[test]
    fn test_register_and_remove() {
        let registry = PendingRegistry::default();
        let key = CacheKey::new(EntityType::Item, "i1");
        let fetch: SharedFetch = async { Ok(Value::Null) }.boxed().shared();

        registry.lock().insert(key.clone(), fetch);
        assert!(registry.lock().contains_key(&key));
        assert_eq!(registry.len(), 1);

        registry.remove(&key);
        registry.remove(&key);
        assert!(!registry.lock().contains_key(&key));
    }
}
