//! Hearth Storage - Keyed Cache and Durable Store
//!
//! The [`KeyedCache`] holds entity records fetched from the backend, with
//! per-entry TTLs and at most one in-flight fetch per key. Settled entries
//! are mirrored into a [`KeyValueStore`] (in memory or LMDB) and reloaded
//! when the cache is opened.

pub mod cache;
pub mod kv;

pub use cache::{CacheEntry, CacheEvent, CacheStats, KeyedCache, PERSISTED_VERSION};
pub use kv::{open_store, InMemoryKeyValueStore, KeyValueStore, LmdbKeyValueStore};
