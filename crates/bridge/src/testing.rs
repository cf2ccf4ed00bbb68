//! Test doubles for the host and driver seams
//!
//! Scripted stand-ins used by unit and integration tests: a port with
//! queueable reads and injectable failures, a driver that hands out
//! such ports, a connection that remembers being closed, and a host
//! whose device list and permission answers the test controls.

use crate::driver::{SerialDriver, SerialPort};
use crate::host::{HostEvent, UsbConnection, UsbHost};
use async_channel::{Receiver, Sender};
use common::{Error, Result};
use protocol::{DeviceId, DeviceInfo, DriverType, HotplugAction, HotplugEvent, LineConfig};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct PortState {
    open: bool,
    reads: VecDeque<Vec<u8>>,
    read_error: Option<String>,
    open_error: Option<String>,
    write_timeout: bool,
    reject_params: bool,
    written: Vec<u8>,
    params: Option<LineConfig>,
    dtr: Option<bool>,
    rts: Option<bool>,
}

/// Scripted serial port
#[derive(Default)]
pub struct MockPort {
    state: Mutex<PortState>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the port open without going through a connection
    pub fn force_open(&self) {
        self.state.lock().unwrap().open = true;
    }

    /// Queue a chunk for the next read
    pub fn push_read(&self, data: Vec<u8>) {
        self.state.lock().unwrap().reads.push_back(data);
    }

    /// Make the next read fail with an I/O error
    pub fn fail_next_read(&self, message: &str) {
        self.state.lock().unwrap().read_error = Some(message.to_string());
    }

    /// Make the next open fail with a device error
    pub fn fail_next_open(&self, message: &str) {
        self.state.lock().unwrap().open_error = Some(message.to_string());
    }

    /// Make every write expire instead of accepting bytes
    pub fn time_out_writes(&self) {
        self.state.lock().unwrap().write_timeout = true;
    }

    /// Reject every line configuration
    pub fn reject_parameters(&self) {
        self.state.lock().unwrap().reject_params = true;
    }

    /// All bytes written so far
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    /// Last applied line configuration
    pub fn params(&self) -> Option<LineConfig> {
        self.state.lock().unwrap().params
    }

    /// Last DTR value set, `None` if never set
    pub fn dtr(&self) -> Option<bool> {
        self.state.lock().unwrap().dtr
    }

    /// Last RTS value set, `None` if never set
    pub fn rts(&self) -> Option<bool> {
        self.state.lock().unwrap().rts
    }
}

impl SerialPort for MockPort {
    fn open(&self, _connection: &dyn UsbConnection) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.open_error.take() {
            return Err(Error::Device(message));
        }
        state.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(message) = state.read_error.take() {
                return Err(Error::Io(message));
            }
            if let Some(chunk) = state.reads.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                return Ok(n);
            }
        }
        // Nothing queued, behave like a quiet line
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(0)
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.write_timeout {
            return Err(Error::IoTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn set_parameters(&self, config: &LineConfig) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.reject_params {
            return Err(Error::UnsupportedConfig(format!(
                "configuration rejected: {} baud",
                config.baud_rate
            )));
        }
        state.params = Some(*config);
        Ok(())
    }

    fn set_dtr(&self, value: bool) -> Result<()> {
        self.state.lock().unwrap().dtr = Some(value);
        Ok(())
    }

    fn set_rts(&self, value: bool) -> Result<()> {
        self.state.lock().unwrap().rts = Some(value);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().unwrap().open = false;
        Ok(())
    }
}

/// Driver handing out `MockPort`s
pub struct MockDriver {
    driver_type: DriverType,
    ports: Vec<Arc<MockPort>>,
}

impl MockDriver {
    pub fn new(driver_type: DriverType, num_ports: usize) -> Self {
        Self {
            driver_type,
            ports: (0..num_ports).map(|_| Arc::new(MockPort::new())).collect(),
        }
    }

    /// Concrete access to a port for scripting
    pub fn port_mock(&self, index: usize) -> Arc<MockPort> {
        Arc::clone(&self.ports[index])
    }
}

impl SerialDriver for MockDriver {
    fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    fn num_ports(&self) -> usize {
        self.ports.len()
    }

    fn port(&self, index: usize) -> Result<Arc<dyn SerialPort>> {
        self.ports
            .get(index)
            .map(|p| Arc::clone(p) as Arc<dyn SerialPort>)
            .ok_or_else(|| Error::Device(format!("no port at index {}", index)))
    }
}

/// Connection that remembers being closed
#[derive(Default)]
pub struct MockConnection {
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl UsbConnection for MockConnection {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MockHostInner {
    devices: Mutex<Vec<DeviceInfo>>,
    denied: Mutex<HashSet<DeviceId>>,
    prompts: Mutex<Vec<DeviceId>>,
    event_tx: Sender<HostEvent>,
    event_rx: Receiver<HostEvent>,
}

/// Scripted host with an injectable device list and permission state
///
/// Clones share state, so a test can keep one clone to attach devices
/// or answer prompts while the bridge owns another.
#[derive(Clone)]
pub struct MockHost {
    inner: Arc<MockHostInner>,
}

impl MockHost {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let (event_tx, event_rx) = async_channel::bounded(64);
        Self {
            inner: Arc::new(MockHostInner {
                devices: Mutex::new(devices),
                denied: Mutex::new(HashSet::new()),
                prompts: Mutex::new(Vec::new()),
                event_tx,
                event_rx,
            }),
        }
    }

    /// Make `open_device` fail with a permission error for a device
    pub fn deny(&self, device_id: DeviceId) {
        self.inner.denied.lock().unwrap().insert(device_id);
    }

    /// Undo a `deny`
    pub fn allow(&self, device_id: DeviceId) {
        self.inner.denied.lock().unwrap().remove(&device_id);
    }

    /// Devices `request_permission` was called for, in order
    pub fn prompts(&self) -> Vec<DeviceId> {
        self.inner.prompts.lock().unwrap().clone()
    }

    /// Add a device and emit an attach event
    pub fn attach(&self, device: DeviceInfo) {
        self.inner.devices.lock().unwrap().push(device.clone());
        self.send(HostEvent::Hotplug(HotplugEvent {
            action: HotplugAction::Attached,
            device,
        }));
    }

    /// Remove a device and emit a detach event
    pub fn detach(&self, device_id: DeviceId) {
        let removed = {
            let mut devices = self.inner.devices.lock().unwrap();
            let index = devices.iter().position(|d| d.device_id == device_id);
            index.map(|i| devices.remove(i))
        };
        if let Some(device) = removed {
            self.send(HostEvent::Hotplug(HotplugEvent {
                action: HotplugAction::Detached,
                device,
            }));
        }
    }

    /// Answer a permission prompt
    pub fn grant(&self, device_id: DeviceId, granted: bool) {
        if granted {
            self.allow(device_id);
        }
        self.send(HostEvent::Permission { device_id, granted });
    }

    fn send(&self, event: HostEvent) {
        self.inner
            .event_tx
            .send_blocking(event)
            .expect("mock host event channel closed");
    }
}

impl UsbHost for MockHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.inner.devices.lock().unwrap().clone())
    }

    fn open_device(&self, device_id: DeviceId) -> Result<Arc<dyn UsbConnection>> {
        if self.inner.denied.lock().unwrap().contains(&device_id) {
            return Err(Error::PermissionDenied);
        }
        let known = self
            .inner
            .devices
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.device_id == device_id);
        if !known {
            return Err(Error::DeviceNotFound);
        }
        Ok(Arc::new(MockConnection::new()))
    }

    fn request_permission(&self, device: &DeviceInfo) -> Result<()> {
        self.inner.prompts.lock().unwrap().push(device.device_id);
        Ok(())
    }

    fn events(&self) -> Receiver<HostEvent> {
        self.inner.event_rx.clone()
    }

    fn poll(&self, _timeout: Duration) {
        // Nothing to drive; yield briefly so the worker loop does not spin
        std::thread::sleep(Duration::from_millis(1));
    }
}
