//! Default configuration values, referenced from `serde(default = ...)`.

use std::path::PathBuf;

pub(super) fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/dri/card0")
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_log_format() -> String {
    "text".to_string()
}

/// Two seconds at 60 Hz.
pub(super) fn default_frames() -> u32 {
    120
}

pub(super) fn default_colors() -> Vec<u32> {
    vec![0x0033_6699, 0x0099_3366]
}
