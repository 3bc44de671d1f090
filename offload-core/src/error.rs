use std::path::PathBuf;

use thiserror::Error;

use crate::abi::DeviceCommand;

/// Status reported for configuration problems (missing variable, missing firmware).
pub const CONFIGURATION_STATUS: i32 = -1000;
/// Status reported when a matrix storage or value tag is not understood.
pub const UNSUPPORTED_FORMAT_STATUS: i32 = -2000;
/// Status reported when a buffer could not be allocated.
pub const ALLOCATION_STATUS: i32 = -3000;
/// Status reported for malformed buffers and invalid arguments.
pub const INVALID_INPUT_STATUS: i32 = -4000;
/// Fallback status for device failures that carry no usable errno.
pub const DEVICE_STATUS: i32 = -5;

#[derive(Error, Debug)]
pub enum OffloadError {
    #[error("Missing configuration: environment variable {0} is not set")]
    MissingConfiguration(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Firmware binary not found: {}", .0.display())]
    FirmwareNotFound(PathBuf),

    #[error("Device {} could not be opened: {source}", path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Device command {command:?} failed with status {status}")]
    Device { command: DeviceCommand, status: i32 },

    #[error("Unsupported matrix format: {0}")]
    UnsupportedFormat(String),

    #[error("Allocation of {size} bytes (alignment {align}) failed")]
    Allocation { size: usize, align: usize },

    #[error("Malformed buffer: {0}")]
    MalformedBuffer(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Argument {position} changed shape across the device call: {detail}")]
    ArgumentMismatch { position: usize, detail: String },

    #[error("Completion wait failed: {0}")]
    Notification(std::io::Error),

    #[error("Interrupt handler could not be installed: {0}")]
    InterruptHandler(String),

    #[error("Local dispatcher error: {0}")]
    Dispatcher(String),

    #[error("Operation not supported on this platform: {0}")]
    UnsupportedPlatform(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OffloadError {
    /// Negative status code reported to callers that expect a C-style result.
    pub fn status(&self) -> i32 {
        match self {
            OffloadError::MissingConfiguration(_)
            | OffloadError::InvalidConfiguration(_)
            | OffloadError::FirmwareNotFound(_) => CONFIGURATION_STATUS,
            OffloadError::Device { status, .. } => *status,
            OffloadError::DeviceUnavailable { source, .. } => source
                .raw_os_error()
                .map(|errno| -errno)
                .unwrap_or(DEVICE_STATUS),
            OffloadError::UnsupportedFormat(_) => UNSUPPORTED_FORMAT_STATUS,
            OffloadError::Allocation { .. } => ALLOCATION_STATUS,
            OffloadError::MalformedBuffer(_)
            | OffloadError::InvalidDimensions(_)
            | OffloadError::InvalidArgument(_)
            | OffloadError::ArgumentMismatch { .. } => INVALID_INPUT_STATUS,
            OffloadError::Notification(err) | OffloadError::IoError(err) => err
                .raw_os_error()
                .map(|errno| -errno)
                .unwrap_or(DEVICE_STATUS),
            OffloadError::InterruptHandler(_)
            | OffloadError::Dispatcher(_)
            | OffloadError::UnsupportedPlatform(_) => DEVICE_STATUS,
        }
    }

    /// True for errors raised before any device interaction could happen.
    pub fn is_configuration(&self) -> bool {
        self.status() == CONFIGURATION_STATUS
    }

    /// True for failures reported by the accelerator device itself.
    pub fn is_device(&self) -> bool {
        matches!(
            self,
            OffloadError::Device { .. } | OffloadError::DeviceUnavailable { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, OffloadError>;
