//! Hearth Core - Identity Types
//!
//! Pure data structures shared by the cache and the job tracker. Every other
//! hearth crate depends on this one; it carries no I/O beyond config loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod clock;
pub mod config;
pub mod error;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use config::{
    CacheConfig, HearthConfig, JobConfig, StorageBackend, StorageConfig, TelemetryConfig,
};
pub use error::{
    CacheError, ConfigError, FetchError, HearthError, HearthResult, JobError, StorageError,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Caller-defined entity identifier. Opaque to the cache.
pub type EntityId = String;

/// Separator between the entity type and the entity id in durable keys.
pub const KEY_SEPARATOR: char = ':';

/// Entity type discriminator for cached records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Character,
    Campaign,
    Item,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [EntityType; 3] = [EntityType::Character, EntityType::Campaign, EntityType::Item];

    /// Lowercase name used in durable keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Campaign => "campaign",
            EntityType::Item => "item",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known entity type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(EntityType::Character),
            "campaign" => Ok(EntityType::Campaign),
            "item" => Ok(EntityType::Item),
            other => Err(UnknownEntityType(other.to_string())),
        }
    }
}

/// Composite cache key: `(entity_type, entity_id)`.
///
/// At most one cache entry exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Render the durable-storage key: `prefix + type + ":" + id`.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{}{}{}{}",
            prefix,
            self.entity_type.as_str(),
            KEY_SEPARATOR,
            self.entity_id
        )
    }

    /// Parse a durable-storage key produced by [`CacheKey::storage_key`].
    ///
    /// Splits on the first separator, so entity ids may themselves contain
    /// colons. Returns `None` for keys outside the prefix or with an unknown
    /// entity type.
    pub fn from_storage_key(prefix: &str, raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(prefix)?;
        let (type_name, entity_id) = rest.split_once(KEY_SEPARATOR)?;
        let entity_type = type_name.parse().ok()?;
        Some(Self::new(entity_type, entity_id))
    }

    /// Prefix covering every durable key of one entity type.
    pub fn type_prefix(prefix: &str, entity_type: EntityType) -> String {
        format!("{}{}{}", prefix, entity_type.as_str(), KEY_SEPARATOR)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_type, KEY_SEPARATOR, self.entity_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PREFIX: &str = "hearth_cache_";

    #[test]
    fn test_storage_key_format() {
        let key = CacheKey::new(EntityType::Character, "abc");
        assert_eq!(key.storage_key(PREFIX), "hearth_cache_character:abc");
    }

    #[test]
    fn test_from_storage_key_rejects_foreign_prefix() {
        assert!(CacheKey::from_storage_key(PREFIX, "theme:dark").is_none());
        assert!(CacheKey::from_storage_key(PREFIX, "hearth_cache_").is_none());
    }

    #[test]
    fn test_from_storage_key_rejects_unknown_type() {
        assert!(CacheKey::from_storage_key(PREFIX, "hearth_cache_wallet:0x1").is_none());
    }

    #[test]
    fn test_from_storage_key_keeps_colons_in_id() {
        let key = CacheKey::from_storage_key(PREFIX, "hearth_cache_item:sword:+1").unwrap();
        assert_eq!(key.entity_type, EntityType::Item);
        assert_eq!(key.entity_id, "sword:+1");
    }

    #[test]
    fn test_type_prefix_matches_storage_keys() {
        let key = CacheKey::new(EntityType::Campaign, "c-9");
        let prefix = CacheKey::type_prefix(PREFIX, EntityType::Campaign);
        assert!(key.storage_key(PREFIX).starts_with(&prefix));
        let other = CacheKey::new(EntityType::Character, "c-9");
        assert!(!other.storage_key(PREFIX).starts_with(&prefix));
    }

    #[test]
    fn test_entity_type_serde_is_lowercase() {
        let json = serde_json::to_string(&EntityType::Campaign).unwrap();
        assert_eq!(json, "\"campaign\"");
        let parsed: EntityType = serde_json::from_str("\"item\"").unwrap();
        assert_eq!(parsed, EntityType::Item);
    }

    proptest! {
        #[test]
        fn prop_storage_key_roundtrip(
            type_idx in 0usize..3,
            entity_id in "[a-zA-Z0-9:_-]{0,24}",
        ) {
            let key = CacheKey::new(EntityType::ALL[type_idx], entity_id);
            let raw = key.storage_key(PREFIX);
            prop_assert_eq!(CacheKey::from_storage_key(PREFIX, &raw), Some(key));
        }

        #[test]
        fn prop_entity_type_str_roundtrip(type_idx in 0usize..3) {
            let entity_type = EntityType::ALL[type_idx];
            prop_assert_eq!(entity_type.as_str().parse::<EntityType>(), Ok(entity_type));
        }
    }
}
