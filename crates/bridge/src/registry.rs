//! Device registry
//!
//! Wraps the host OS seam with the bridge's enumeration policy: VID:PID
//! filters from config, device lookup for session creation, and the
//! single-subscriber hotplug stream.

use crate::events::EventStream;
use crate::host::{UsbConnection, UsbHost};
use async_channel::Receiver;
use common::{Error, Result};
use protocol::{DeviceId, DeviceInfo, HotplugEvent};
use std::sync::Arc;
use tracing::debug;

/// Filtered view over the host's device list
pub struct DeviceRegistry<H: UsbHost> {
    host: H,
    /// Device filters (VID:PID patterns)
    allowed_filters: Vec<String>,
    hotplug: Arc<EventStream<HotplugEvent>>,
}

impl<H: UsbHost> DeviceRegistry<H> {
    pub fn new(host: H, allowed_filters: Vec<String>, event_capacity: usize) -> Self {
        Self {
            host,
            allowed_filters,
            hotplug: Arc::new(EventStream::new(event_capacity)),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Snapshot of attached devices that pass the configured filters
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self
            .host
            .list_devices()?
            .into_iter()
            .filter(|d| check_filter(d.vendor_id, d.product_id, &self.allowed_filters))
            .collect::<Vec<_>>();

        debug!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    /// Find the device a create request addresses
    ///
    /// A non-zero `device_id` matches by identity first; when no
    /// attached device carries that id (ids change across replug), the
    /// first device with the requested VID/PID wins instead. Both paths
    /// see only filtered devices.
    pub fn find_device(&self, device_id: u32, vid: u16, pid: u16) -> Result<DeviceInfo> {
        let devices = self.list_devices()?;

        if device_id != 0 {
            if let Some(device) = devices.iter().find(|d| d.device_id == DeviceId(device_id)) {
                return Ok(device.clone());
            }
        }

        devices
            .into_iter()
            .find(|d| d.vendor_id == vid && d.product_id == pid)
            .ok_or(Error::DeviceNotFound)
    }

    /// Open an OS connection to a device
    pub fn open_connection(&self, device_id: DeviceId) -> Result<Arc<dyn UsbConnection>> {
        self.host.open_device(device_id)
    }

    /// Ask the OS to prompt for access
    pub fn request_permission(&self, device: &DeviceInfo) -> Result<()> {
        self.host.request_permission(device)
    }

    /// Subscribe to attach/detach notifications
    ///
    /// Single-subscriber: a new subscription replaces the prior one.
    pub fn subscribe_hotplug(&self) -> Receiver<HotplugEvent> {
        self.hotplug.subscribe()
    }

    /// Publish a hotplug event to the current subscriber, if any
    ///
    /// Events for filtered-out devices are suppressed so subscribers
    /// never see devices `list_devices` would hide.
    pub fn publish_hotplug(&self, event: HotplugEvent) {
        if !check_filter(
            event.device.vendor_id,
            event.device.product_id,
            &self.allowed_filters,
        ) {
            debug!(
                "Hotplug event ignored by filter: vid={:#06x}, pid={:#06x}",
                event.device.vendor_id, event.device.product_id
            );
            return;
        }
        self.hotplug.publish(event);
    }
}

/// Check if a VID/PID pair is allowed by the filters
fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    // If no filters are defined, all devices are allowed
    if filters.is_empty() {
        return true;
    }

    for filter in filters {
        // Filter format: "0xVID:0xPID" or "0xVID:*"
        // We assume filters are validated by config loader
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            continue;
        }

        let vid_match = parts[0] == "*"
            || u16::from_str_radix(parts[0].trim_start_matches("0x"), 16)
                .map(|v| v == vid)
                .unwrap_or(false);

        if !vid_match {
            continue;
        }

        let pid_match = parts[1] == "*"
            || u16::from_str_radix(parts[1].trim_start_matches("0x"), 16)
                .map(|p| p == pid)
                .unwrap_or(false);

        if pid_match {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;
    use common::test_utils::mock_device_info;
    use protocol::HotplugAction;

    #[test]
    fn test_filter_logic() {
        let filters = vec![
            "0x1234:0x5678".to_string(), // Exact match
            "0xABCD:*".to_string(),      // Wildcard PID
        ];

        assert!(check_filter(0x1234, 0x5678, &filters));
        assert!(check_filter(0xABCD, 0x1111, &filters));
        assert!(check_filter(0xABCD, 0x9999, &filters));

        assert!(!check_filter(0x1234, 0x9999, &filters)); // Wrong PID
        assert!(!check_filter(0x9999, 0x5678, &filters)); // Wrong VID

        // Empty filters = allow all
        assert!(check_filter(0x1234, 0x5678, &[]));
    }

    #[test]
    fn test_list_devices_applies_filters() {
        let host = MockHost::new(vec![
            mock_device_info(1, 0x1a86, 0x7523),
            mock_device_info(2, 0x0403, 0x6001),
        ]);
        let registry = DeviceRegistry::new(host, vec!["0x1a86:*".to_string()], 16);

        let devices = registry.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor_id, 0x1a86);
    }

    #[test]
    fn test_find_device_by_id_takes_precedence() {
        // Two devices share a VID/PID; the id must disambiguate
        let host = MockHost::new(vec![
            mock_device_info(1, 0x1a86, 0x7523),
            mock_device_info(2, 0x1a86, 0x7523),
        ]);
        let registry = DeviceRegistry::new(host, Vec::new(), 16);

        let device = registry.find_device(2, 0x0000, 0x0000).unwrap();
        assert_eq!(device.device_id, DeviceId(2));
    }

    #[test]
    fn test_find_device_by_vid_pid() {
        let host = MockHost::new(vec![
            mock_device_info(1, 0x1a86, 0x7523),
            mock_device_info(2, 0x0403, 0x6001),
        ]);
        let registry = DeviceRegistry::new(host, Vec::new(), 16);

        let device = registry.find_device(0, 0x0403, 0x6001).unwrap();
        assert_eq!(device.device_id, DeviceId(2));
    }

    #[test]
    fn test_find_device_stale_id_falls_back_to_vid_pid() {
        // Ids are reassigned when a device is replugged; a request
        // carrying an old id but the right VID/PID must still resolve
        let host = MockHost::new(vec![mock_device_info(1, 0x1a86, 0x7523)]);
        let registry = DeviceRegistry::new(host, Vec::new(), 16);

        let device = registry.find_device(5, 0x1a86, 0x7523).unwrap();
        assert_eq!(device.device_id, DeviceId(1));
    }

    #[test]
    fn test_find_device_not_found() {
        let host = MockHost::new(vec![mock_device_info(1, 0x1a86, 0x7523)]);
        let registry = DeviceRegistry::new(host, Vec::new(), 16);

        assert!(matches!(
            registry.find_device(9, 0, 0),
            Err(Error::DeviceNotFound)
        ));
        assert!(matches!(
            registry.find_device(0, 0xffff, 0xffff),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_hotplug_respects_filters() {
        let host = MockHost::new(Vec::new());
        let registry = DeviceRegistry::new(host, vec!["0x1a86:*".to_string()], 16);
        let rx = registry.subscribe_hotplug();

        registry.publish_hotplug(HotplugEvent {
            action: HotplugAction::Attached,
            device: mock_device_info(5, 0x0403, 0x6001),
        });
        registry.publish_hotplug(HotplugEvent {
            action: HotplugAction::Attached,
            device: mock_device_info(6, 0x1a86, 0x7523),
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.device.device_id, DeviceId(6));
        assert!(rx.try_recv().is_err());
    }
}
