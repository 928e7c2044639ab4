//! Tracing initialization

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize tracing with env-filter and JSON formatting
///
/// The filter defaults to the configured service log level; the `RUST_LOG`
/// environment variable overrides it.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    let result = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        .try_init();

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already initialized: {}", e);
    } else {
        tracing::info!("Tracing initialized for service: {}", config.service.name);
    }

    Ok(())
}
