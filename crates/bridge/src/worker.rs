//! Bridge worker thread
//!
//! Dedicated blocking thread for all USB and serial work. The loop
//! interleaves three duties: commands from the async side, host events
//! (hotplug, permission answers), and driving the host's own event
//! machinery. Everything the service touches is confined to this
//! thread, so no session state needs locking.

use crate::config::BridgeConfig;
use crate::driver::Prober;
use crate::host::{HostEvent, UsbHost};
use crate::os::RusbHost;
use crate::registry::DeviceRegistry;
use crate::service::BridgeService;
use async_channel::Receiver;
use common::{BridgeHandle, Error, Result, WorkerEndpoint, create_bridge};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// How long each loop iteration drives the host before checking
/// for commands again
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The blocking side of the bridge
pub struct BridgeWorker<H: UsbHost> {
    service: BridgeService<H>,
    endpoint: WorkerEndpoint,
    host_events: Receiver<HostEvent>,
}

impl<H: UsbHost> BridgeWorker<H> {
    pub fn new(host: H, endpoint: WorkerEndpoint, config: &BridgeConfig, prober: Prober) -> Self {
        let host_events = host.events();
        let registry = DeviceRegistry::new(
            host,
            config.usb.filters.clone(),
            config.serial.event_buffer,
        );
        let service = BridgeService::new(registry, prober, config.serial.clone());

        Self {
            service,
            endpoint,
            host_events,
        }
    }

    /// Run the worker loop until a shutdown command arrives
    pub fn run(mut self) {
        info!("Bridge worker thread started");

        loop {
            // Commands first so callers see low latency
            while let Some(cmd) = self.endpoint.try_recv_command() {
                if !self.service.handle_command(cmd) {
                    info!("Bridge worker thread stopped");
                    return;
                }
            }

            while let Ok(event) = self.host_events.try_recv() {
                self.service.handle_host_event(event);
            }

            self.service.registry().host().poll(POLL_INTERVAL);
        }
    }
}

/// Spawn the worker over the real USB host
///
/// Returns the async-side handle and the worker thread's join handle.
pub fn spawn_bridge_worker(
    config: BridgeConfig,
    prober: Prober,
) -> Result<(BridgeHandle, JoinHandle<()>)> {
    let (handle, endpoint) = create_bridge();
    let host = RusbHost::new(config.serial.event_buffer)?;
    let worker = BridgeWorker::new(host, endpoint, &config, prober);

    let thread = std::thread::Builder::new()
        .name("usb-bridge-worker".to_string())
        .spawn(move || worker.run())
        .map_err(|e| Error::Channel(format!("failed to spawn worker thread: {}", e)))?;

    Ok((handle, thread))
}

/// Spawn the worker over a caller-supplied host (used by tests)
pub fn spawn_bridge_worker_with<H: UsbHost + 'static>(
    host: H,
    config: BridgeConfig,
    prober: Prober,
) -> Result<(BridgeHandle, JoinHandle<()>)> {
    let (handle, endpoint) = create_bridge();
    let worker = BridgeWorker::new(host, endpoint, &config, prober);

    let thread = std::thread::Builder::new()
        .name("usb-bridge-worker".to_string())
        .spawn(move || worker.run())
        .map_err(|e| Error::Channel(format!("failed to spawn worker thread: {}", e)))?;

    Ok((handle, thread))
}
