use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ResetError, Result};

/// Install the global structured-logging subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ResetError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target.unwrap_or(false))
        .with_line_number(config.include_line_number.unwrap_or(true));

    let installed = match config.format.as_deref() {
        Some("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| ResetError::Other(format!("Failed to install tracing subscriber: {}", e)))
}
