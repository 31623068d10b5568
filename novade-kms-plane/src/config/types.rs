//! Configuration structures for the KMS plane service.
//!
//! Every section and field is optional in the TOML file; missing values come
//! from [`super::defaults`].

use std::path::PathBuf;

use serde::Deserialize;

use crate::config::defaults;
use crate::error::ConfigError;
use crate::output::ModeRequest;

/// Root configuration.
///
/// # Examples
///
/// ```
/// use novade_kms_plane::config::KmsConfig;
///
/// let config: KmsConfig = toml::from_str(
///     r#"
///     [output]
///     connector = "HDMI-A-1"
///     mode = "1280x720@60"
///     "#,
/// ).unwrap();
/// assert_eq!(config.output.connector.as_deref(), Some("HDMI-A-1"));
/// assert_eq!(config.device.path.to_str(), Some("/dev/dri/card0"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmsConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// DRM card node to open.
    #[serde(default = "defaults::default_device_path")]
    pub path: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: defaults::default_device_path(),
        }
    }
}

/// Which output to drive and how.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Connector name such as `HDMI-A-1` or `eDP-1`. The first connected
    /// connector is used when unset.
    #[serde(default)]
    pub connector: Option<String>,
    /// Mode as `WIDTHxHEIGHT[@HZ]`. The connector's preferred mode is used
    /// when unset.
    #[serde(default)]
    pub mode: Option<String>,
}

impl OutputConfig {
    /// Parses the configured mode, if any.
    pub fn mode_request(&self) -> Result<Option<ModeRequest>, ConfigError> {
        self.mode.as_deref().map(str::parse).transpose()
    }
}

/// Logging subsystem configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level: "trace", "debug", "info", "warn" or "error"
    /// (case-insensitive). `RUST_LOG` takes precedence when set.
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// "text" or "json" (case-insensitive).
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::default_log_level(),
            format: defaults::default_log_format(),
        }
    }
}

/// Settings for the demo binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    /// Frames to present before restoring the CRTC and exiting.
    #[serde(default = "defaults::default_frames")]
    pub frames: u32,
    /// Solid colours (`0x00RRGGBB`) of the buffers presented in turn.
    #[serde(default = "defaults::default_colors")]
    pub colors: Vec<u32>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: defaults::default_frames(),
            colors: defaults::default_colors(),
        }
    }
}
