//! Common utilities for usb-serial-bridge
//!
//! This crate provides the pieces shared between the protocol boundary
//! and the bridge core: the error taxonomy, the async channel bridge to
//! the blocking worker thread, logging setup, and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{BridgeCommand, BridgeHandle, WorkerEndpoint, create_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
