//! Logging setup on top of `tracing-subscriber`.
//!
//! All output goes to stderr. `RUST_LOG` overrides the configured level so a
//! single run can be made more verbose without touching the config file.

use std::io::{stderr, IsTerminal};

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Best-effort INFO logging to stderr for early startup and tests.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(stderr)
        .with_ansi(stderr().is_terminal())
        .try_init();
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// [`ConfigError::Logging`] if the level or format is unknown, or a global
/// subscriber was already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;

    let result = match config.format.to_lowercase().as_str() {
        "json" => fmt::Subscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_writer(stderr)
            .with_ansi(false)
            .try_init(),
        "text" => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(stderr)
            .with_ansi(stderr().is_terminal())
            .try_init(),
        other => return Err(ConfigError::Logging(format!("Invalid log format in config: {other}"))),
    };
    result.map_err(|err| ConfigError::Logging(format!("Failed to set global subscriber: {err}")))?;

    tracing::debug!(level = %config.level, format = %config.format, "Logging initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(ConfigError::Logging(format!("Invalid log level in config: {other}"))),
    };
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
}
