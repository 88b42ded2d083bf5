//! Poll interval and stop conditions.

use std::time::Duration;

use hearth_core::config::{JobConfig, DEFAULT_POLL_INTERVAL_MS};

/// How often to poll and when to give up.
///
/// The default polls every second with no cap, leaving termination to the
/// job. Caps are opt-in via `[jobs]` config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: None,
            max_duration: None,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
            max_duration: config.max_duration(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub(crate) fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    pub(crate) fn deadline_passed(&self, elapsed: Duration) -> bool {
        self.max_duration.is_some_and(|max| elapsed >= max)
    }
}
