//! Keyed entity cache.
//!
//! Entries live in memory and are mirrored to a [`KeyValueStore`](crate::kv::KeyValueStore)
//! so they survive restarts. Reads never block on the network; `fetch`
//! deduplicates concurrent loads for the same key.

mod entry;
mod events;
mod keyed;
mod pending;
mod stats;

pub use entry::{CacheEntry, PERSISTED_VERSION};
pub use events::CacheEvent;
pub use keyed::KeyedCache;
pub use stats::CacheStats;
