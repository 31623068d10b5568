//! Configuration for the KMS plane service.
//!
//! - [`types`]: the TOML schema rooted at [`KmsConfig`].
//! - [`defaults`]: values used for anything the file leaves out.
//! - [`loader`]: [`ConfigLoader`], which locates, parses and validates the file.

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, CONFIG_ENV_VAR};
pub use types::{DemoConfig, DeviceConfig, KmsConfig, LoggingConfig, OutputConfig};
