//! Cache entries and their durable representation.

use chrono::Duration as ChronoDuration;
use hearth_core::{CacheError, CacheKey, EntityType, HearthError, HearthResult, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Version tag written into every durable record. Records carrying any other
/// version are treated as unparsable.
pub const PERSISTED_VERSION: u32 = 1;

/// The cached record for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Last known value. `None` only while the first fetch for a key is in
    /// flight or after that first fetch failed.
    pub data: Option<T>,
    /// Absolute time after which the entry is stale for `fetch` purposes.
    pub expires_at: Timestamp,
    /// True while a fetch for this key is in flight.
    pub loading: bool,
    /// Last fetch error, cleared by the next successful fetch or `set`.
    pub error: Option<HearthError>,
    /// Copy of the key's entity type, used for type-scoped clears.
    pub entity_type: EntityType,
}

impl<T> CacheEntry<T> {
    /// Fresh entry holding `data`, expiring `ttl` after `now`.
    pub fn fresh(entity_type: EntityType, data: T, now: Timestamp, ttl: Duration) -> Self {
        Self {
            data: Some(data),
            expires_at: expiry_from(now, ttl),
            loading: false,
            error: None,
            entity_type,
        }
    }

    /// Placeholder for a key whose first fetch just started.
    pub fn loading(entity_type: EntityType, now: Timestamp) -> Self {
        Self {
            data: None,
            expires_at: now,
            loading: true,
            error: None,
            entity_type,
        }
    }

    /// True if the entry can be served by `fetch` without refetching.
    ///
    /// Entries without data are never fresh.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.data.is_some() && self.expires_at > now
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

impl CacheEntry<Value> {
    /// Decode the stored JSON into the caller's type.
    pub(crate) fn decode<T: DeserializeOwned>(&self, key: &CacheKey) -> HearthResult<CacheEntry<T>> {
        let data = match &self.data {
            Some(value) => Some(decode_value(key, value.clone())?),
            None => None,
        };
        Ok(CacheEntry {
            data,
            expires_at: self.expires_at,
            loading: self.loading,
            error: self.error.clone(),
            entity_type: self.entity_type,
        })
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(key: &CacheKey, value: Value) -> HearthResult<T> {
    serde_json::from_value(value).map_err(|e| {
        CacheError::Deserialization {
            key: key.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

pub(crate) fn encode_value<T: Serialize>(key: &CacheKey, data: &T) -> HearthResult<Value> {
    serde_json::to_value(data).map_err(|e| {
        CacheError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// `now + ttl`, saturating at the maximum representable timestamp.
pub(crate) fn expiry_from(now: Timestamp, ttl: Duration) -> Timestamp {
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// Durable form of a settled entry.
///
/// Only settled entries are persisted, so `loading` is always false and
/// `error` always empty in storage; neither is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub version: u32,
    pub data: Value,
    pub expires_at: Timestamp,
    pub entity_type: EntityType,
}

impl PersistedEntry {
    pub fn from_entry(entry: &CacheEntry<Value>) -> Option<Self> {
        entry.data.as_ref().map(|data| Self {
            version: PERSISTED_VERSION,
            data: data.clone(),
            expires_at: entry.expires_at,
            entity_type: entry.entity_type,
        })
    }

    /// Parse a stored record for `key`.
    ///
    /// Fails on malformed JSON, a foreign version, or an entity type that
    /// disagrees with the key.
    pub fn parse(key: &CacheKey, raw: &str) -> Result<Self, String> {
        let record: PersistedEntry = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        if record.version != PERSISTED_VERSION {
            return Err(format!(
                "unsupported record version {} (expected {})",
                record.version, PERSISTED_VERSION
            ));
        }
        if record.entity_type != key.entity_type {
            return Err(format!(
                "record entity type {} does not match key type {}",
                record.entity_type, key.entity_type
            ));
        }
        Ok(record)
    }

    pub fn into_entry(self) -> CacheEntry<Value> {
        CacheEntry {
            data: Some(self.data),
            expires_at: self.expires_at,
            loading: false,
            error: None,
            entity_type: self.entity_type,
        }
    }
}
