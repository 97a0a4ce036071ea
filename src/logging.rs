//! Logging setup.
//!
//! The database layer only emits `tracing` events; installing a subscriber
//! is the application's job and happens once at startup.
//!
//! Environment variables:
//!   RUST_LOG    # Log filter, overrides the configured level

use crate::config::LoggingConfig;
use crate::core::{Result, StoreError};
use tracing_subscriber::EnvFilter;

/// Builds the event filter: `RUST_LOG` when set, otherwise the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| StoreError::Config(format!("invalid log level '{}': {}", config.level, e))),
    }
}

/// Installs a console subscriber for the process.
///
/// # Errors
///
/// `StoreError::Config` if the level is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .compact()
        .try_init()
        .map_err(|e| StoreError::Config(format!("failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        // The first call may already have happened in another test
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        let config = LoggingConfig {
            level: "storefront_db=debug,info".to_string(),
            with_target: true,
        };
        assert!(build_filter(&config).is_ok());
    }
}
