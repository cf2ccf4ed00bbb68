//! rusb-backed host implementation
//!
//! Desktop implementation of the `UsbHost` seam over libusb. Device
//! identities are assigned per (bus, address) and stay stable for the
//! lifetime of the host, so a device keeps its id across repeated
//! enumerations. libusb has no permission prompt; `request_permission`
//! probes by opening the device and reports the outcome as an event,
//! matching the asynchronous grant delivery of hosts that do prompt.

use crate::host::{HostEvent, UsbConnection, UsbHost};
use async_channel::{Receiver, Sender};
use common::{Error, Result};
use protocol::{DeviceId, DeviceInfo, HotplugAction, HotplugEvent};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Identity and descriptor cache shared with the hotplug callback
struct HostState {
    /// (bus, address) -> assigned id
    ids: HashMap<(u8, u8), DeviceId>,
    /// Cached info per (bus, address), for detach events after the
    /// device is gone
    info: HashMap<(u8, u8), DeviceInfo>,
    next_id: u32,
}

impl HostState {
    fn id_for(&mut self, key: (u8, u8)) -> DeviceId {
        *self.ids.entry(key).or_insert_with(|| {
            let id = DeviceId(self.next_id);
            self.next_id += 1;
            id
        })
    }
}

/// `UsbHost` over a libusb context
pub struct RusbHost {
    context: Context,
    state: Arc<Mutex<HostState>>,
    event_tx: Sender<HostEvent>,
    event_rx: Receiver<HostEvent>,
    _hotplug_registration: Option<Registration<Context>>,
}

impl RusbHost {
    /// Create a host and register hotplug callbacks
    pub fn new(event_capacity: usize) -> Result<Self> {
        let context = Context::new().map_err(|e| Error::Enumeration(e.to_string()))?;
        let state = Arc::new(Mutex::new(HostState {
            ids: HashMap::new(),
            info: HashMap::new(),
            next_id: 1,
        }));
        let (event_tx, event_rx) = async_channel::bounded(event_capacity);

        let registration = if rusb::has_hotplug() {
            let callback = HotplugCallback {
                state: Arc::clone(&state),
                event_tx: event_tx.clone(),
            };
            match HotplugBuilder::new()
                .enumerate(false)
                .register(&context, Box::new(callback))
            {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Failed to register hotplug callbacks: {}", e);
                    None
                }
            }
        } else {
            debug!("Hotplug not supported on this platform");
            None
        };

        Ok(Self {
            context,
            state,
            event_tx,
            event_rx,
            _hotplug_registration: registration,
        })
    }

    fn find_device(&self, device_id: DeviceId) -> Result<Device<Context>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Enumeration(e.to_string()))?;

        let state = self.state.lock().expect("host state lock poisoned");
        devices
            .iter()
            .find(|d| {
                state.ids.get(&(d.bus_number(), d.address())) == Some(&device_id)
            })
            .ok_or(Error::DeviceNotFound)
    }
}

impl UsbHost for RusbHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Enumeration(e.to_string()))?;

        let mut state = self.state.lock().expect("host state lock poisoned");
        let mut result = Vec::new();

        for device in devices.iter() {
            let key = (device.bus_number(), device.address());
            let id = state.id_for(key);
            match describe_device(&device, id) {
                Ok(info) => {
                    state.info.insert(key, info.clone());
                    result.push(info);
                }
                Err(e) => {
                    // Unreadable descriptor, skip rather than fail the list
                    warn!(
                        "Failed to read descriptor for bus={} addr={}: {}",
                        key.0, key.1, e
                    );
                }
            }
        }

        debug!("Enumerated {} devices", result.len());
        Ok(result)
    }

    fn open_device(&self, device_id: DeviceId) -> Result<Arc<dyn UsbConnection>> {
        let device = self.find_device(device_id)?;
        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access => Error::PermissionDenied,
            rusb::Error::NotFound => Error::DeviceNotFound,
            _ => Error::Device(e.to_string()),
        })?;

        debug!("Opened device {:?}", device_id);
        Ok(Arc::new(RusbConnection {
            handle: Mutex::new(Some(handle)),
        }))
    }

    fn request_permission(&self, device: &DeviceInfo) -> Result<()> {
        // No OS prompt here; probe access by opening
        let granted = self
            .find_device(device.device_id)
            .and_then(|d| {
                d.open().map_err(|e| match e {
                    rusb::Error::Access => Error::PermissionDenied,
                    _ => Error::Device(e.to_string()),
                })
            })
            .is_ok();

        self.event_tx
            .send_blocking(HostEvent::Permission {
                device_id: device.device_id,
                granted,
            })
            .map_err(|e| Error::Channel(e.to_string()))
    }

    fn events(&self) -> Receiver<HostEvent> {
        self.event_rx.clone()
    }

    fn poll(&self, timeout: Duration) {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(timeout);
            }
        }
    }
}

/// An opened libusb device handle
pub struct RusbConnection {
    handle: Mutex<Option<DeviceHandle<Context>>>,
}

impl RusbConnection {
    /// The underlying handle, `None` once closed
    ///
    /// Drivers lock through this to issue transfers.
    pub fn handle(&self) -> std::sync::MutexGuard<'_, Option<DeviceHandle<Context>>> {
        self.handle.lock().expect("connection lock poisoned")
    }
}

impl UsbConnection for RusbConnection {
    fn close(&self) {
        // Dropping the handle releases it in libusb
        self.handle.lock().expect("connection lock poisoned").take();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build a `DeviceInfo` from a live device
///
/// String descriptors need an open handle; when opening fails (no
/// access, device busy) they are listed as absent rather than failing
/// enumeration.
fn describe_device(device: &Device<Context>, id: DeviceId) -> std::result::Result<DeviceInfo, rusb::Error> {
    let descriptor = device.device_descriptor()?;

    let strings = device.open().ok().and_then(|handle| {
        let timeout = Duration::from_millis(100);
        let language = handle.read_languages(timeout).ok()?.first().copied()?;
        Some((
            handle
                .read_manufacturer_string(language, &descriptor, timeout)
                .ok(),
            handle.read_product_string(language, &descriptor, timeout).ok(),
            handle
                .read_serial_number_string(language, &descriptor, timeout)
                .ok(),
        ))
    });
    let (manufacturer, product, serial_number) = strings.unwrap_or((None, None, None));

    let interface_count = device
        .active_config_descriptor()
        .map(|c| c.num_interfaces())
        .unwrap_or(1);

    Ok(DeviceInfo {
        device_id: id,
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        device_name: format!(
            "/dev/bus/usb/{:03}/{:03}",
            device.bus_number(),
            device.address()
        ),
        manufacturer,
        product,
        serial_number,
        interface_count,
    })
}

/// Hotplug callback translating libusb notifications to host events
struct HotplugCallback {
    state: Arc<Mutex<HostState>>,
    event_tx: Sender<HostEvent>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        let mut state = self.state.lock().expect("host state lock poisoned");
        let id = state.id_for(key);

        match describe_device(&device, id) {
            Ok(info) => {
                state.info.insert(key, info.clone());
                drop(state);
                if let Err(e) = self.event_tx.send_blocking(HostEvent::Hotplug(HotplugEvent {
                    action: HotplugAction::Attached,
                    device: info,
                })) {
                    warn!("Failed to send attach event: {}", e);
                }
            }
            Err(e) => {
                warn!(
                    "Failed to describe arrived device bus={} addr={}: {}",
                    key.0, key.1, e
                );
            }
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        let mut state = self.state.lock().expect("host state lock poisoned");
        state.ids.remove(&key);
        let Some(info) = state.info.remove(&key) else {
            // Never enumerated, nothing to report
            return;
        };
        drop(state);

        if let Err(e) = self.event_tx.send_blocking(HostEvent::Hotplug(HotplugEvent {
            action: HotplugAction::Detached,
            device: info,
        })) {
            warn!("Failed to send detach event: {}", e);
        }
    }
}
