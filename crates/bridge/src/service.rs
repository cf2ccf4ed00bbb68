//! Control-channel dispatch
//!
//! `BridgeService` is the single-threaded heart of the bridge: it owns
//! the registry, the driver table, every live session, and the pending
//! permission waiters, and it processes one command or host event at a
//! time on the worker thread.
//!
//! A create request that hits a permission wall does not fail: the
//! service prompts the OS, parks the request, and finishes it when the
//! grant event arrives. One waiter per device; a newer request
//! supersedes an older one and the older caller is told no.

use crate::config::SerialSettings;
use crate::driver::Prober;
use crate::host::{HostEvent, UsbHost};
use crate::permission::PermissionBroker;
use crate::registry::DeviceRegistry;
use crate::session::SerialSession;
use async_channel::Receiver;
use common::{BridgeCommand, Error, Result};
use protocol::{
    ControlRequest, ControlResponse, DeviceId, DeviceInfo, DriverType, LineConfig, SessionEvent,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Prefix of per-session event channel names
pub const SESSION_CHANNEL_PREFIX: &str = "usb-serial-bridge/session/";

type Responder = tokio::sync::oneshot::Sender<ControlResponse>;

/// Everything needed to finish a create once access is granted
struct CreateSpec {
    driver: DriverType,
    device_id: u32,
    vid: u16,
    pid: u16,
    port: usize,
}

/// A caller parked on a permission prompt
enum Waiter {
    /// Plain permission request; resolves to `Granted`
    Grant(Responder),
    /// Create that hit a permission wall; retried on grant
    Create { spec: CreateSpec, responder: Responder },
}

/// Registry, sessions, and dispatch state for the worker thread
pub struct BridgeService<H: UsbHost> {
    registry: DeviceRegistry<H>,
    prober: Prober,
    sessions: HashMap<String, SerialSession>,
    permissions: PermissionBroker<Waiter>,
    serial: SerialSettings,
    next_session: u32,
}

impl<H: UsbHost> BridgeService<H> {
    pub fn new(registry: DeviceRegistry<H>, prober: Prober, serial: SerialSettings) -> Self {
        Self {
            registry,
            prober,
            sessions: HashMap::new(),
            permissions: PermissionBroker::new(),
            serial,
            next_session: 1,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry<H> {
        &self.registry
    }

    /// Process one command; returns `false` on shutdown
    pub fn handle_command(&mut self, cmd: BridgeCommand) -> bool {
        match cmd {
            BridgeCommand::Call { request, response } => {
                self.handle_request(request, response);
                true
            }
            BridgeCommand::SubscribeHotplug { response } => {
                let _ = response.send(self.registry.subscribe_hotplug());
                true
            }
            BridgeCommand::SubscribeSession {
                channel_name,
                response,
            } => {
                let _ = response.send(self.subscribe_session(&channel_name));
                true
            }
            BridgeCommand::Shutdown => {
                self.shutdown();
                false
            }
        }
    }

    /// Dispatch one control request
    pub fn handle_request(&mut self, request: ControlRequest, responder: Responder) {
        match request {
            ControlRequest::ListDevices => {
                let response = match self.registry.list_devices() {
                    Ok(devices) => ControlResponse::Devices(devices),
                    Err(e) => failure(&e),
                };
                respond(responder, response);
            }

            ControlRequest::Create {
                driver,
                vid,
                pid,
                device_id,
                port,
            } => {
                let Some(driver_type) = DriverType::from_label(driver.as_deref()) else {
                    let label = driver.unwrap_or_default();
                    respond(responder, failure(&Error::UnknownDriverType(label)));
                    return;
                };
                let spec = CreateSpec {
                    driver: driver_type,
                    device_id,
                    vid,
                    pid,
                    port: port.unwrap_or(self.serial.default_port),
                };
                self.handle_create(spec, responder);
            }

            ControlRequest::RequestPermission { device_id } => {
                // 0 is the match-by-VID/PID sentinel on create; a
                // permission prompt needs a concrete device
                if device_id == 0 {
                    respond(responder, failure(&Error::DeviceNotFound));
                    return;
                }
                let device = match self.registry.find_device(device_id, 0, 0) {
                    Ok(d) => d,
                    Err(e) => {
                        respond(responder, failure(&e));
                        return;
                    }
                };
                if let Err(e) = self.registry.request_permission(&device) {
                    respond(responder, failure(&e));
                    return;
                }
                self.park(device.device_id, Waiter::Grant(responder));
            }

            ControlRequest::Open { channel_name } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.open())
                    .map_or_else(|e| failure(&e), ControlResponse::Opened);
                respond(responder, response);
            }

            ControlRequest::Close { channel_name } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.close())
                    .map_or_else(|e| failure(&e), |_| ControlResponse::Done);
                respond(responder, response);
            }

            ControlRequest::Connect { channel_name } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.connect())
                    .map_or_else(|e| failure(&e), ControlResponse::Connected);
                respond(responder, response);
            }

            ControlRequest::Disconnect { channel_name } => {
                let response = match self.session_mut(&channel_name) {
                    Ok(session) => {
                        session.disconnect();
                        ControlResponse::Done
                    }
                    Err(e) => failure(&e),
                };
                respond(responder, response);
            }

            ControlRequest::Write {
                channel_name,
                data,
                timeout_ms,
            } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.write(&data, timeout_ms))
                    .map_or_else(|e| failure(&e), |_| ControlResponse::Done);
                respond(responder, response);
            }

            ControlRequest::SetParameters {
                channel_name,
                baud_rate,
                data_bits,
                stop_bits,
                parity,
            } => {
                let Some(config) = LineConfig::from_raw(baud_rate, data_bits, stop_bits, parity)
                else {
                    let e = Error::UnsupportedConfig(format!(
                        "invalid line configuration {}/{}/{}/{}",
                        baud_rate, data_bits, stop_bits, parity
                    ));
                    respond(responder, failure(&e));
                    return;
                };
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.set_parameters(&config))
                    .map_or_else(|e| failure(&e), |_| ControlResponse::Done);
                respond(responder, response);
            }

            ControlRequest::SetDtr {
                channel_name,
                value,
            } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.set_dtr(value))
                    .map_or_else(|e| failure(&e), |_| ControlResponse::Done);
                respond(responder, response);
            }

            ControlRequest::SetRts {
                channel_name,
                value,
            } => {
                let response = self
                    .session_mut(&channel_name)
                    .and_then(|s| s.set_rts(value))
                    .map_or_else(|e| failure(&e), |_| ControlResponse::Done);
                respond(responder, response);
            }
        }
    }

    /// Apply one asynchronous host notification
    pub fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Hotplug(hotplug) => {
                self.registry.publish_hotplug(hotplug);
            }
            HostEvent::Permission { device_id, granted } => {
                let Some(waiter) = self.permissions.take(device_id) else {
                    debug!("Permission answer for {:?} with no waiter", device_id);
                    return;
                };
                match waiter {
                    Waiter::Grant(responder) => {
                        respond(responder, ControlResponse::Granted(granted));
                    }
                    Waiter::Create { spec, responder } => {
                        if !granted {
                            respond(responder, failure(&Error::PermissionDenied));
                            return;
                        }
                        // One retry; a denial after a grant is final
                        let response = self
                            .registry
                            .find_device(spec.device_id, spec.vid, spec.pid)
                            .and_then(|device| self.create_session(&spec, &device))
                            .map_or_else(
                                |e| failure(&e),
                                |channel_name| ControlResponse::Created { channel_name },
                            );
                        respond(responder, response);
                    }
                }
            }
        }
    }

    /// Receiver for a session's events, `None` when the name is unknown
    pub fn subscribe_session(&self, channel_name: &str) -> Option<Receiver<SessionEvent>> {
        self.sessions.get(channel_name).map(|s| s.subscribe())
    }

    /// Tear down all sessions and resolve pending waiters
    pub fn shutdown(&mut self) {
        info!("Bridge service shutting down");
        for session in self.sessions.values_mut() {
            session.disconnect();
        }
        self.sessions.clear();

        for (device_id, waiter) in self.permissions.drain() {
            debug!("Resolving pending waiter for {:?} at shutdown", device_id);
            match waiter {
                Waiter::Grant(responder) => {
                    respond(responder, ControlResponse::Granted(false));
                }
                Waiter::Create { responder, .. } => {
                    respond(responder, failure(&Error::PermissionDenied));
                }
            }
        }
    }

    fn handle_create(&mut self, spec: CreateSpec, responder: Responder) {
        let device = match self.registry.find_device(spec.device_id, spec.vid, spec.pid) {
            Ok(d) => d,
            Err(e) => {
                respond(responder, failure(&e));
                return;
            }
        };

        match self.create_session(&spec, &device) {
            Ok(channel_name) => {
                respond(responder, ControlResponse::Created { channel_name });
            }
            Err(Error::PermissionDenied) => {
                debug!("Create for {:?} parked on permission", device.device_id);
                if let Err(e) = self.registry.request_permission(&device) {
                    respond(responder, failure(&e));
                    return;
                }
                self.park(device.device_id, Waiter::Create { spec, responder });
            }
            Err(e) => {
                respond(responder, failure(&e));
            }
        }
    }

    /// Resolve a driver, open the device, and register the session
    fn create_session(&mut self, spec: &CreateSpec, device: &DeviceInfo) -> Result<String> {
        let driver = self.prober.resolve(spec.driver, device)?;
        let connection = self.registry.open_connection(device.device_id)?;
        let port = driver.port(spec.port)?;

        let channel_name = format!("{}{}", SESSION_CHANNEL_PREFIX, self.next_session);
        self.next_session += 1;

        let session = SerialSession::new(
            channel_name.clone(),
            port,
            connection,
            self.serial.event_buffer,
            self.serial.read_timeout(),
        );
        info!(
            "Created session {} for device {:?} ({} driver)",
            channel_name,
            device.device_id,
            driver.driver_type().label().unwrap_or("auto")
        );
        self.sessions.insert(channel_name.clone(), session);
        Ok(channel_name)
    }

    /// Register a waiter, resolving any superseded one with a denial
    fn park(&mut self, device_id: DeviceId, waiter: Waiter) {
        if let Some(old) = self.permissions.register(device_id, waiter) {
            warn!("Permission waiter for {:?} superseded", device_id);
            match old {
                Waiter::Grant(responder) => {
                    respond(responder, ControlResponse::Granted(false));
                }
                Waiter::Create { responder, .. } => {
                    respond(responder, failure(&Error::PermissionDenied));
                }
            }
        }
    }

    fn session_mut(&mut self, channel_name: &str) -> Result<&mut SerialSession> {
        self.sessions
            .get_mut(channel_name)
            .ok_or_else(|| Error::SessionNotFound(channel_name.to_string()))
    }
}

fn failure(e: &Error) -> ControlResponse {
    ControlResponse::Failed {
        kind: e.kind(),
        message: e.to_string(),
    }
}

fn respond(responder: Responder, response: ControlResponse) {
    // The caller may have given up waiting
    let _ = responder.send(response);
}
