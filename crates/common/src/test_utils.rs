//! Test utilities for usb-serial-bridge
//!
//! Provides mock device descriptors shared by unit and integration
//! tests across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::mock_device_info;
//!
//! let device = mock_device_info(1, 0x1a86, 0x7523);
//! assert_eq!(device.vendor_id, 0x1a86);
//! ```

use protocol::{DeviceId, DeviceInfo};

/// Create a mock DeviceInfo with readable string descriptors
pub fn mock_device_info(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        device_id: DeviceId(id),
        vendor_id,
        product_id,
        device_name: format!("/dev/bus/usb/001/{:03}", id),
        manufacturer: Some(format!("Test Manufacturer {}", id)),
        product: Some(format!("Test Product {}", id)),
        serial_number: Some(format!("SN{:06}", id)),
        interface_count: 1,
    }
}

/// Create a mock DeviceInfo whose string descriptors are unreadable
///
/// Models a device the caller has no permission to query: the optional
/// fields are absent, which must never fail a listing.
pub fn mock_device_info_unreadable(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        manufacturer: None,
        product: None,
        serial_number: None,
        ..mock_device_info(id, vendor_id, product_id)
    }
}
