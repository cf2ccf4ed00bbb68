//! Protocol message definitions
//!
//! This module defines the messages exchanged between the application
//! framework and the bridge. The surface splits into a request/response
//! control channel (registry and per-session operations) and push-only
//! event payloads (hotplug, session data).

use crate::types::{DeviceInfo, HotplugEvent, SessionEvent};
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// Top-level message envelope
///
/// Every message carries the protocol version so peers can reject
/// incompatible encodings before interpreting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version of this message
    pub version: ProtocolVersion,
    /// Message payload
    pub payload: MessagePayload,
}

/// All message types in the protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Control call from the framework to the bridge
    Request(ControlRequest),
    /// Control reply from the bridge to the framework
    Response(ControlResponse),
    /// Hotplug push on the registry event channel
    Hotplug(HotplugEvent),
    /// Data or read-error push on a session event channel
    Session {
        /// Channel name of the session this event belongs to
        channel_name: String,
        /// The event itself
        event: SessionEvent,
    },
}

/// Control channel requests
///
/// Registry-scope requests stand alone; session-scope requests are
/// addressed by the session channel name returned from `Create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Snapshot of all currently attached devices
    ListDevices,

    /// Resolve a device, open it, and create a serial session
    Create {
        /// Driver selection label (absent = auto-probe)
        driver: Option<String>,
        /// Vendor ID to match when `device_id` does not match
        vid: u16,
        /// Product ID to match when `device_id` does not match
        pid: u16,
        /// Exact device identity; takes precedence over (vid, pid)
        device_id: u32,
        /// Port index on the resolved driver (absent = configured default)
        port: Option<usize>,
    },

    /// Ask the OS to prompt for access to a device
    RequestPermission {
        /// Device to request access for
        device_id: u32,
    },

    /// Open the session's port against its connection
    Open {
        /// Session channel name from `Create`
        channel_name: String,
    },

    /// Close the session's port handle
    Close {
        channel_name: String,
    },

    /// Blocking write with a caller-specified timeout
    Write {
        channel_name: String,
        /// Bytes to write
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Apply UART framing parameters
    ///
    /// Raw integers are decoded at this boundary; out-of-range values
    /// fail with an unsupported-configuration error.
    SetParameters {
        channel_name: String,
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: u8,
    },

    /// Set the DTR control line
    SetDtr {
        channel_name: String,
        value: bool,
    },

    /// Set the RTS control line
    SetRts {
        channel_name: String,
        value: bool,
    },

    /// Start the session's background read pump
    Connect {
        channel_name: String,
    },

    /// Stop the pump and tear the session down
    Disconnect {
        channel_name: String,
    },
}

/// Control channel responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Device list snapshot
    Devices(Vec<DeviceInfo>),

    /// Session created; all further session calls use this name
    Created {
        /// Session-specific channel name
        channel_name: String,
    },

    /// Result of `Open`: `false` means the port was already open
    Opened(bool),

    /// Result of `Connect`: `false` means the port was not open
    /// (or a pump is already running)
    Connected(bool),

    /// Result of `RequestPermission`
    Granted(bool),

    /// Operation completed with nothing to report
    Done,

    /// Operation failed with a classified error
    Failed {
        /// Error classification for caller branching
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },
}

/// Error classification carried on the wire
///
/// Mirrors the bridge error taxonomy so remote callers can branch
/// without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The OS could not produce a device list
    Enumeration,
    /// The OS refused access to the device
    PermissionDenied,
    /// No device matched the requested identity
    DeviceNotFound,
    /// Auto-probe found no driver for the device
    NoDriver,
    /// Explicit driver label was not recognized
    UnknownDriverType,
    /// Opening the device or port failed
    Device,
    /// The driver rejected the line configuration
    UnsupportedConfig,
    /// Operation requires an open port
    NotOpen,
    /// Write timed out
    IoTimeout,
    /// Runtime device I/O failure
    Io,
    /// Session channel name did not resolve
    SessionNotFound,
    /// Internal channel failure
    Channel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::CURRENT_VERSION;

    #[test]
    fn test_message_construction() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Request(ControlRequest::ListDevices),
        };
        assert_eq!(msg.version, CURRENT_VERSION);
    }

    #[test]
    fn test_create_request_shape() {
        let req = ControlRequest::Create {
            driver: Some("ftdi".to_string()),
            vid: 0x0403,
            pid: 0x6001,
            device_id: 3,
            port: None,
        };
        let ControlRequest::Create { driver, vid, .. } = req else {
            panic!("expected Create");
        };
        assert_eq!(driver.as_deref(), Some("ftdi"));
        assert_eq!(vid, 0x0403);
    }
}
