//! Loading and validation of [`KmsConfig`].
//!
//! The file is looked up in this order:
//!
//! 1. the path passed to [`ConfigLoader::load`] (typically `--config`), which
//!    must exist;
//! 2. the path in `$NOVADE_KMS_CONFIG`, silently skipped if the file is
//!    missing;
//! 3. built-in defaults.
//!
//! Whatever is loaded goes through [`ConfigLoader::validate_config`], which
//! normalizes case-insensitive values in place.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::KmsConfig;
use crate::error::ConfigError;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "NOVADE_KMS_CONFIG";

/// Namespace for the configuration loading functions.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ReadError`] if `path` is given but cannot be read, or
    ///   the env-provided file exists but cannot be read.
    /// - [`ConfigError::ParseError`] for malformed TOML or unknown fields.
    /// - [`ConfigError::ValidationError`] for unusable values.
    pub fn load(path: Option<&Path>) -> Result<KmsConfig, ConfigError> {
        let env_path = env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::load_from(path, env_path.as_deref())
    }

    fn load_from(explicit: Option<&Path>, from_env: Option<&Path>) -> Result<KmsConfig, ConfigError> {
        let content = match (explicit, from_env) {
            (Some(path), _) => Some(Self::read(path)?),
            (None, Some(path)) => match fs::read_to_string(path) {
                Ok(content) => Some(content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "Configuration file not found, using defaults");
                    None
                }
                Err(source) => {
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            },
            (None, None) => None,
        };

        let mut config = match content {
            Some(content) => Self::parse(&content)?,
            None => KmsConfig::default(),
        };
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// Parses TOML without validating it.
    pub fn parse(content: &str) -> Result<KmsConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(KmsConfig::default());
        }
        Ok(toml::from_str(content)?)
    }

    fn read(path: &Path) -> Result<String, ConfigError> {
        fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks `config` and normalizes the log level and format to lower case.
    pub fn validate_config(config: &mut KmsConfig) -> Result<(), ConfigError> {
        let level = config.logging.level.to_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => config.logging.level = level,
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: '{}'. Must be one of trace, debug, info, warn, error.",
                    config.logging.level
                )))
            }
        }

        let format = config.logging.format.to_lowercase();
        match format.as_str() {
            "text" | "json" => config.logging.format = format,
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: '{}'. Must be one of text, json.",
                    config.logging.format
                )))
            }
        }

        config.output.mode_request()?;

        if config.output.connector.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "output.connector must not be empty".to_string(),
            ));
        }

        if config.demo.frames == 0 {
            return Err(ConfigError::ValidationError(
                "demo.frames must be at least 1".to_string(),
            ));
        }
        if config.demo.colors.is_empty() {
            return Err(ConfigError::ValidationError(
                "demo.colors must list at least one colour".to_string(),
            ));
        }

        Ok(())
    }
}
