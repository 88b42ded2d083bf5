//! Clock abstraction for expiry decisions.
//!
//! Entry expiry is absolute wall-clock time (it survives restarts through
//! durable storage), so the cache reads time through this trait and tests can
//! drive it by hand.

use crate::Timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}
