//! Tracing subscriber initialisation

use crate::config::LoggingConfig;
use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the log filter: `RUST_LOG` wins, the configured level is the fallback
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Internal(format!("Failed to initialise tracing: {}", e)))
}
