//! Tracing subscriber setup for hosts that do not install their own.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs a `fmt` subscriber filtered by `config.level`, as JSON when
/// `config.json` is set. An unparsable level falls back to `info`.
///
/// # Errors
///
/// Returns [`LoggingError::AlreadyInitialized`] if the host (or an earlier
/// call) already installed a global subscriber. Hosts may ignore it.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|_| LoggingError::AlreadyInitialized)
}
