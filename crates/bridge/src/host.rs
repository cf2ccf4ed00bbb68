//! Host OS USB seam
//!
//! The registry talks to the operating system's USB subsystem through
//! the `UsbHost` trait: device enumeration, opening connections, and
//! permission prompts. Grants and hotplug notifications arrive
//! asynchronously on the host's event channel, mirroring the
//! broadcast-style delivery of the underlying platforms.

use async_channel::Receiver;
use common::Result;
use protocol::{DeviceId, DeviceInfo, HotplugEvent};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// An opened OS-level connection to a USB device
///
/// Opaque to the registry and session; drivers downcast through
/// `as_any` to reach the concrete handle they were built for.
pub trait UsbConnection: Send + Sync {
    /// Release the OS connection. Idempotent.
    fn close(&self);

    /// Concrete-type access for driver implementations
    fn as_any(&self) -> &dyn Any;
}

/// Asynchronous notifications from the host OS
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A device was attached or detached
    Hotplug(HotplugEvent),

    /// A permission prompt was answered
    Permission {
        /// Device the prompt was for
        device_id: DeviceId,
        /// Whether access was granted
        granted: bool,
    },
}

/// The host OS USB subsystem
pub trait UsbHost: Send {
    /// Snapshot of all currently attached devices
    ///
    /// Never blocks on permission; devices whose string descriptors
    /// cannot be read are listed with those fields absent.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open an OS connection to a device
    ///
    /// Fails with `PermissionDenied` when the caller lacks access and
    /// with `Device` for other open failures.
    fn open_device(&self, device_id: DeviceId) -> Result<Arc<dyn UsbConnection>>;

    /// Ask the OS to prompt for access to a device
    ///
    /// Returns once the prompt is issued; the answer arrives later as
    /// a `HostEvent::Permission` on the event channel.
    fn request_permission(&self, device: &DeviceInfo) -> Result<()>;

    /// Receiver for hotplug and permission events
    fn events(&self) -> Receiver<HostEvent>;

    /// Drive the host's event machinery for up to `timeout`
    ///
    /// Called from the worker loop between commands. Hosts with no
    /// polling requirement may sleep to avoid spinning.
    fn poll(&self, timeout: Duration);
}
