//! Common error types
//!
//! One taxonomy for the whole bridge. Permission denial and the
//! open/connect idempotence cases are soft-signaled as booleans by the
//! operations themselves; everything else propagates as a distinct
//! variant so callers can branch. `PermissionDenied` only escapes as
//! an error from `create`, where a denied grant fails the whole call.

use protocol::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The OS could not produce a device list
    #[error("Could not enumerate USB devices: {0}")]
    Enumeration(String),

    /// The OS refused access to the device
    #[error("USB permission denied")]
    PermissionDenied,

    /// No attached device matched the requested identity
    #[error("No such device")]
    DeviceNotFound,

    /// Auto-probe found no driver for the device
    #[error("No driver for device")]
    NoDriver,

    /// Explicit driver label was not recognized
    #[error("Unknown driver type: {0:?}")]
    UnknownDriverType(String),

    /// Opening the device or port failed
    #[error("Device error: {0}")]
    Device(String),

    /// The driver rejected the line configuration
    #[error("Unsupported port configuration: {0}")]
    UnsupportedConfig(String),

    /// Operation was attempted before the port was opened
    #[error("{operation} requires an open port")]
    NotOpen { operation: &'static str },

    /// Write did not complete within the caller's timeout
    #[error("Write timed out after {timeout_ms} ms")]
    IoTimeout { timeout_ms: u64 },

    /// Runtime read/write failure, commonly device detachment
    #[error("Device I/O failed: {0}")]
    Io(String),

    /// Session channel name did not resolve to a live session
    #[error("No session for channel {0:?}")]
    SessionNotFound(String),

    /// Internal channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wire classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Enumeration(_) => ErrorKind::Enumeration,
            Error::PermissionDenied => ErrorKind::PermissionDenied,
            Error::DeviceNotFound => ErrorKind::DeviceNotFound,
            Error::NoDriver => ErrorKind::NoDriver,
            Error::UnknownDriverType(_) => ErrorKind::UnknownDriverType,
            Error::Device(_) => ErrorKind::Device,
            Error::UnsupportedConfig(_) => ErrorKind::UnsupportedConfig,
            Error::NotOpen { .. } => ErrorKind::NotOpen,
            Error::IoTimeout { .. } => ErrorKind::IoTimeout,
            Error::Io(_) => ErrorKind::Io,
            Error::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Error::Channel(_) | Error::Config(_) => ErrorKind::Channel,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::UnknownDriverType("bogus".into()).kind(),
            ErrorKind::UnknownDriverType
        );
        assert_eq!(Error::DeviceNotFound.kind(), ErrorKind::DeviceNotFound);
        assert_eq!(
            Error::NotOpen { operation: "write" }.kind(),
            ErrorKind::NotOpen
        );
        assert_eq!(Error::IoTimeout { timeout_ms: 100 }.kind(), ErrorKind::IoTimeout);
    }

    #[test]
    fn test_not_open_display_names_operation() {
        let err = Error::NotOpen { operation: "write" };
        assert_eq!(format!("{}", err), "write requires an open port");
    }
}
