//! USB serial bridge core
//!
//! In-process bridge between an async application layer and USB
//! serial converter hardware. The async side talks through
//! [`common::BridgeHandle`]; a single blocking worker thread owns the
//! USB host, the device registry, and every serial session. Peers on
//! the far side of a byte stream are served the framed wire protocol
//! by [`transport::serve_connection`].
//!
//! The crate is organized around two seams: [`host::UsbHost`] hides
//! the operating system's USB subsystem (with [`os::RusbHost`] as the
//! libusb-backed implementation), and [`driver::SerialDriver`] /
//! [`driver::SerialPort`] hide chip-specific UART framing. Drivers are
//! registered in a [`driver::Prober`] handed to
//! [`worker::spawn_bridge_worker`].

pub mod config;
pub mod driver;
pub mod events;
pub mod host;
pub mod os;
pub mod permission;
pub mod pump;
pub mod registry;
pub mod service;
pub mod session;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::BridgeConfig;
pub use driver::{DriverFactory, Prober, SerialDriver, SerialPort};
pub use host::{HostEvent, UsbConnection, UsbHost};
pub use os::RusbHost;
pub use registry::DeviceRegistry;
pub use service::{BridgeService, SESSION_CHANNEL_PREFIX};
pub use session::SerialSession;
pub use transport::serve_connection;
pub use worker::{BridgeWorker, spawn_bridge_worker, spawn_bridge_worker_with};
