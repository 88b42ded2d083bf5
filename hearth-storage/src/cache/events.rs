//! Change notifications for cache observers.
//!
//! UI layers subscribe to re-render when cache state changes. Events are
//! delivered over a bounded broadcast channel; a lagging receiver skips
//! events rather than blocking cache writers.

use hearth_core::{CacheKey, EntityType};

/// A change to the cache's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A fetch started for the key.
    Loading(CacheKey),
    /// The key received fresh data via `set` or a successful fetch.
    Updated(CacheKey),
    /// A fetch for the key failed; any previous data is still readable.
    Failed(CacheKey),
    /// The key was removed.
    Removed(CacheKey),
    /// Every key of a type (or every key, for `None`) was cleared.
    Cleared(Option<EntityType>),
}

impl CacheEvent {
    /// The key this event concerns, if it is key-scoped.
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            CacheEvent::Loading(key)
            | CacheEvent::Updated(key)
            | CacheEvent::Failed(key)
            | CacheEvent::Removed(key) => Some(key),
            CacheEvent::Cleared(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key() {
        let key = CacheKey::new(EntityType::Campaign, "c1");
        assert_eq!(CacheEvent::Updated(key.clone()).key(), Some(&key));
        assert_eq!(CacheEvent::Cleared(Some(EntityType::Campaign)).key(), None);
    }
}
