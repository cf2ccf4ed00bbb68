//! Device and serial type definitions
//!
//! This module defines the types exchanged over the control and event
//! channels: device descriptors, driver type tags, UART line
//! configuration, and the event payloads pushed to subscribers.

use serde::{Deserialize, Serialize};

/// Unique device identifier (host-assigned)
///
/// Process-local numeric identity for an attached USB device. Stable
/// while the device stays attached; never persisted across detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Device information returned in discovery
///
/// Snapshot of a USB device descriptor as seen by the host OS. The
/// optional string fields stay `None` when the host lacks permission
/// to read them; their absence is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Host-assigned device identifier
    pub device_id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// OS device node name (e.g. "/dev/bus/usb/001/004")
    pub device_name: String,
    /// Manufacturer string (if readable)
    pub manufacturer: Option<String>,
    /// Product string (if readable)
    pub product: Option<String>,
    /// Serial number string (if readable; requires device access)
    pub serial_number: Option<String>,
    /// Number of USB interfaces on the active configuration
    pub interface_count: u8,
}

/// Serial driver selection
///
/// `Auto` delegates to descriptor-based probing; the other variants
/// force a specific chip driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverType {
    /// Probe the device and pick the first matching driver
    Auto,
    /// WCH CH340/CH341 family
    Ch340,
    /// Silicon Labs CP210x family
    Cp210x,
    /// FTDI FT232/FT2232 family
    Ftdi,
    /// USB CDC-ACM class devices
    CdcAcm,
}

impl DriverType {
    /// Decode the wire label for a driver type.
    ///
    /// An absent label selects `Auto`. Unrecognized labels yield `None`
    /// and must be rejected at the boundary, not deeper in the stack.
    pub fn from_label(label: Option<&str>) -> Option<Self> {
        match label {
            None => Some(Self::Auto),
            Some("ch34x") => Some(Self::Ch340),
            Some("cp21xx") => Some(Self::Cp210x),
            Some("ftdi") => Some(Self::Ftdi),
            Some("cdc") => Some(Self::CdcAcm),
            Some(_) => None,
        }
    }

    /// Wire label for this driver type (`None` for `Auto`)
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Ch340 => Some("ch34x"),
            Self::Cp210x => Some("cp21xx"),
            Self::Ftdi => Some("ftdi"),
            Self::CdcAcm => Some("cdc"),
        }
    }
}

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Decode the raw wire value (5..=8)
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

/// Number of stop bits
///
/// Raw values follow the usb-serial convention: 1 = one, 2 = two,
/// 3 = one and a half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    /// Decode the raw wire value
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::OnePointFive),
            _ => None,
        }
    }
}

/// Parity scheme
///
/// Raw values: 0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Decode the raw wire value
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Odd),
            2 => Some(Self::Even),
            3 => Some(Self::Mark),
            4 => Some(Self::Space),
            _ => None,
        }
    }
}

/// UART framing parameters applied to an open port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl LineConfig {
    /// Decode raw wire integers into a validated line configuration.
    ///
    /// Returns `None` when any field is out of range; the bridge maps
    /// that to an unsupported-configuration error.
    pub fn from_raw(baud_rate: u32, data_bits: u8, stop_bits: u8, parity: u8) -> Option<Self> {
        Some(Self {
            baud_rate,
            data_bits: DataBits::from_raw(data_bits)?,
            stop_bits: StopBits::from_raw(stop_bits)?,
            parity: Parity::from_raw(parity)?,
        })
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Hotplug event direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotplugAction {
    /// Device was plugged in
    #[serde(rename = "attached")]
    Attached,
    /// Device was unplugged
    #[serde(rename = "detached")]
    Detached,
}

/// Hotplug notification pushed to the registry's event subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugEvent {
    /// Attach or detach
    pub action: HotplugAction,
    /// Full device payload at the time of the event
    pub device: DeviceInfo,
}

/// Event pushed to a session's data subscriber
///
/// Data chunks arrive in read order; chunk boundaries are whatever the
/// port's read pump produced. Read failures are a distinct variant so
/// they never masquerade as payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A chunk of bytes read from the port
    Data(#[serde(with = "serde_bytes")] Vec<u8>),
    /// A read failure reported by the pump; the session stays up
    ReadError {
        /// Human-readable failure description
        message: String,
    },
}
