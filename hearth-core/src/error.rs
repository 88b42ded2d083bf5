//! Error types for hearth operations
//!
//! Every error is `Clone`: a single fetch result is shared by all
//! deduplicated callers, and the cache keeps the last error on its entry.

use crate::CacheKey;
use std::time::Duration;
use thiserror::Error;

/// Durable storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for key {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Delete failed for key {key}: {reason}")]
    Delete { key: String, reason: String },

    #[error("Key scan failed: {reason}")]
    Scan { reason: String },

    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Failed to serialize value for {key}: {reason}")]
    Serialization { key: CacheKey, reason: String },

    #[error("Failed to decode cached value for {key}: {reason}")]
    Deserialization { key: CacheKey, reason: String },
}

/// Failures of caller-supplied fetch functions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{reason}")]
    Failed { reason: String },

    #[error("Fetch for {key} panicked: {reason}")]
    Panicked { key: CacheKey, reason: String },

    #[error("Fetch for {key} was aborted: {reason}")]
    Aborted { key: CacheKey, reason: String },
}

impl FetchError {
    /// Build a plain fetch failure from any message.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Generation job errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("{reason}")]
    SubmitFailed { reason: String },

    #[error("Status request for job {job_id} failed: {reason}")]
    PollFailed { job_id: String, reason: String },

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Job {job_id} reported completion without a result")]
    MissingResult { job_id: String },

    #[error("Job {job_id} still running after {attempts} status requests")]
    AttemptsExhausted { job_id: String, attempts: u32 },

    #[error("Job {job_id} timed out after {elapsed:?}")]
    TimedOut { job_id: String, elapsed: Duration },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("Failed to initialise telemetry: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all hearth errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HearthError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl HearthError {
    /// Shorthand for a plain fetch failure.
    pub fn fetch(reason: impl Into<String>) -> Self {
        Self::Fetch(FetchError::failed(reason))
    }
}

/// Result type alias for hearth operations.
pub type HearthResult<T> = Result<T, HearthError>;

// =============================================================================
// TESTS
// =============================================================================
