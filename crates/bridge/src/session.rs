//! Serial session lifecycle
//!
//! One `SerialSession` per created port. The session owns the opened
//! OS connection, the driver port, the single data subscriber slot,
//! and the read pump; every control operation on the session channel
//! lands here.
//!
//! Lifecycle: created -> open -> connect -> disconnect -> close.
//! `open` and `connect` soft-fail with `false` instead of erroring
//! when they have nothing to do, so callers can treat "already open"
//! and "not open yet" as ordinary outcomes.

use crate::driver::SerialPort;
use crate::events::EventStream;
use crate::host::UsbConnection;
use crate::pump::ReadPump;
use async_channel::Receiver;
use common::{Error, Result};
use protocol::{LineConfig, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One opened serial port and its lifecycle state
pub struct SerialSession {
    channel_name: String,
    port: Arc<dyn SerialPort>,
    connection: Arc<dyn UsbConnection>,
    events: Arc<EventStream<SessionEvent>>,
    pump: Option<ReadPump>,
    read_timeout: Duration,
    disconnected: bool,
}

impl SerialSession {
    /// Create a session over a resolved port and opened connection
    pub fn new(
        channel_name: String,
        port: Arc<dyn SerialPort>,
        connection: Arc<dyn UsbConnection>,
        event_capacity: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            channel_name,
            port,
            connection,
            events: Arc::new(EventStream::new(event_capacity)),
            pump: None,
            read_timeout,
            disconnected: false,
        }
    }

    /// The session-specific channel name callers address this session by
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Open the port against the session's connection
    ///
    /// Returns `false` when the port is already open (a no-op, not an
    /// error); fails with `Device` when the OS-level open fails.
    pub fn open(&mut self) -> Result<bool> {
        if self.port.is_open() {
            return Ok(false);
        }
        self.port.open(self.connection.as_ref())?;
        debug!(session = %self.channel_name, "port opened");
        Ok(true)
    }

    /// Close the port handle
    ///
    /// Leaves DTR/RTS and the OS connection alone; `disconnect` is the
    /// full teardown.
    pub fn close(&mut self) -> Result<bool> {
        self.port.close()?;
        Ok(true)
    }

    /// Apply UART framing parameters
    ///
    /// Takes effect on the next read/write. The driver rejecting the
    /// combination surfaces as `UnsupportedConfig`.
    pub fn set_parameters(&mut self, config: &LineConfig) -> Result<()> {
        self.port.set_parameters(config)
    }

    /// Start the background read pump
    ///
    /// Returns `false` when the port is not open or a pump is already
    /// running; exactly one pump may exist per session.
    pub fn connect(&mut self) -> Result<bool> {
        if !self.port.is_open() || self.pump.is_some() {
            return Ok(false);
        }

        let pump = ReadPump::start(
            &format!("{}-pump", self.channel_name),
            Arc::clone(&self.port),
            Arc::clone(&self.events),
            self.read_timeout,
        )?;
        self.pump = Some(pump);
        debug!(session = %self.channel_name, "pump connected");
        Ok(true)
    }

    /// Whether the pump is currently running
    pub fn is_connected(&self) -> bool {
        self.pump.is_some()
    }

    /// Blocking write with a caller-specified timeout
    ///
    /// State error before `open` succeeds; `IoTimeout` on expiry, `Io`
    /// on device failure.
    pub fn write(&mut self, data: &[u8], timeout_ms: u64) -> Result<()> {
        if !self.port.is_open() {
            return Err(Error::NotOpen { operation: "write" });
        }
        self.port.write(data, Duration::from_millis(timeout_ms))
    }

    /// Set the DTR control line
    pub fn set_dtr(&mut self, value: bool) -> Result<()> {
        if !self.port.is_open() {
            return Err(Error::NotOpen { operation: "setDTR" });
        }
        self.port.set_dtr(value)
    }

    /// Set the RTS control line
    pub fn set_rts(&mut self, value: bool) -> Result<()> {
        if !self.port.is_open() {
            return Err(Error::NotOpen { operation: "setRTS" });
        }
        self.port.set_rts(value)
    }

    /// Stop the pump and tear the session down
    ///
    /// Idempotent; later calls are no-ops. The pump is stopped and
    /// joined before the port and connection are released, so no event
    /// is delivered after this returns. Control lines are dropped
    /// best-effort: a device that vanished mid-teardown must not abort
    /// the rest of it.
    pub fn disconnect(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop();
        }

        if self.disconnected {
            return;
        }
        self.disconnected = true;

        if self.port.is_open() {
            if let Err(e) = self.port.set_dtr(false) {
                warn!(session = %self.channel_name, "failed to drop DTR: {}", e);
            }
            if let Err(e) = self.port.set_rts(false) {
                warn!(session = %self.channel_name, "failed to drop RTS: {}", e);
            }
        }
        if let Err(e) = self.port.close() {
            warn!(session = %self.channel_name, "failed to close port: {}", e);
        }
        self.connection.close();
        debug!(session = %self.channel_name, "disconnected");
    }

    /// Subscribe to the session's data/error events
    ///
    /// At most one subscriber; a new subscription replaces the prior
    /// one.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
