//! Tracing subscriber initialisation.
//!
//! Host applications call [`init_tracing`] once at startup. Library code only
//! emits `tracing` events and never installs a subscriber itself.

use crate::config::TelemetryConfig;
use crate::error::{ConfigError, HearthResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when it is set. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> HearthResult<()> {
    let env_filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| ConfigError::Telemetry {
        reason: e.to_string(),
    })?;

    tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialised");
    Ok(())
}

fn build_filter(config: &TelemetryConfig) -> HearthResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            ConfigError::InvalidValue {
                field: "telemetry.filter".to_string(),
                value: config.filter.clone(),
                reason: e.to_string(),
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let config = TelemetryConfig::default();
        assert!(EnvFilter::try_new(&config.filter).is_ok());
    }
}
