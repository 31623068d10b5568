//! Error types for the KMS plane.
//!
//! [`PlaneError`] is what the scan-out path reports to its immediate caller:
//! a buffer that cannot be scanned out, an allocation failure, or a rejected
//! kernel call carrying the kernel's errno. None of them are retried here;
//! the scene manager decides what to do with the next frame.
//!
//! [`BackendError`] covers device setup (opening the card, discovering an
//! output, wiring the event loop), and [`ConfigError`] covers configuration
//! loading and validation.

use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use novade_buffer_manager::BufferId;
use thiserror::Error;

/// The kernel call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    GetCrtc,
    SetCrtc,
    PageFlip,
    AddFramebuffer,
    RemoveFramebuffer,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOp::GetCrtc => "get CRTC",
            DeviceOp::SetCrtc => "set CRTC",
            DeviceOp::PageFlip => "page flip",
            DeviceOp::AddFramebuffer => "add framebuffer",
            DeviceOp::RemoveFramebuffer => "remove framebuffer",
        };
        f.write_str(name)
    }
}

/// Errors returned by the scan-out operations of a plane.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// The buffer cannot provide a memory handle usable for scan-out.
    #[error("{0} cannot provide a DRM memory handle")]
    InvalidBuffer(BufferId),

    /// Allocation failed for the named piece of bookkeeping.
    #[error("Out of memory while allocating {0}")]
    OutOfMemory(&'static str),

    /// A kernel mode-setting call was rejected.
    #[error("Kernel {operation} failed: {errno}")]
    Device { operation: DeviceOp, errno: Errno },
}

impl PlaneError {
    /// Wraps an I/O error coming back from the DRM device.
    ///
    /// Errors without an OS error code are reported as `EIO`.
    pub fn device(operation: DeviceOp, err: io::Error) -> Self {
        let errno = err.raw_os_error().map(Errno::from_i32).unwrap_or(Errno::EIO);
        PlaneError::Device { operation, errno }
    }

    /// The kernel error code, for device errors.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            PlaneError::Device { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Convenience alias for plane operations.
pub type Result<T, E = PlaneError> = std::result::Result<T, E>;

/// Errors raised while bringing up a card, an output or the event loop.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to open DRM device {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("DRM device query failed: {0}")]
    Io(#[from] io::Error),

    #[error("Event loop error: {0}")]
    EventLoop(#[from] calloop::Error),

    #[error("No connected output found")]
    NoConnectedOutput,

    #[error("Connector {0} not found or not connected")]
    ConnectorNotFound(String),

    #[error("Connector {connector} has no mode matching {requested}")]
    NoMatchingMode { connector: String, requested: String },

    #[error("No usable CRTC for connector {0}")]
    NoCrtc(String),

    #[error("Plane error: {0}")]
    Plane(#[from] PlaneError),
}

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::KmsConfig`].
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// The logging subsystem could not be initialized from the configuration.
    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_keeps_errno() {
        let err = PlaneError::device(DeviceOp::PageFlip, io::Error::from_raw_os_error(Errno::EBUSY as i32));
        assert_eq!(err.errno(), Some(Errno::EBUSY));
        assert_eq!(err.to_string(), format!("Kernel page flip failed: {}", Errno::EBUSY));
    }

    #[test]
    fn test_device_error_without_os_code_is_eio() {
        let err = PlaneError::device(DeviceOp::SetCrtc, io::Error::new(io::ErrorKind::Other, "synthetic"));
        assert_eq!(err.errno(), Some(Errno::EIO));
    }

    #[test]
    fn test_non_device_errors_have_no_errno() {
        assert_eq!(PlaneError::OutOfMemory("connector list").errno(), None);
        assert_eq!(
            PlaneError::OutOfMemory("connector list").to_string(),
            "Out of memory while allocating connector list"
        );
    }
}
