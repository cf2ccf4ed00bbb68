//! Background read pump
//!
//! One pump thread per connected session. The pump loops bounded-
//! timeout reads on the port and publishes every chunk to the session's
//! event stream in arrival order. Chunk boundaries are whatever the
//! port produced; the pump never reassembles.
//!
//! A read failure is published as a `ReadError` event and ends the
//! pump loop, but it does not tear the session down: the subscriber is
//! told and decides whether to disconnect.

use crate::driver::SerialPort;
use crate::events::EventStream;
use common::{Error, Result};
use protocol::SessionEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Read buffer size per iteration
const READ_BUF_SIZE: usize = 4096;

/// Handle to a running pump thread
pub struct ReadPump {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReadPump {
    /// Start a pump on `port`, publishing to `events`
    ///
    /// `read_timeout` bounds each read so the pump notices its stop
    /// flag promptly; it also bounds how long `stop` can take.
    pub fn start(
        name: &str,
        port: Arc<dyn SerialPort>,
        events: Arc<EventStream<SessionEvent>>,
        read_timeout: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_pump(port, events, stop_flag, read_timeout))
            .map_err(|e| Error::Channel(format!("failed to spawn pump thread: {}", e)))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the pump and wait for the thread to exit
    ///
    /// Synchronous from the caller's point of view: when this returns,
    /// no further events will be published by this pump.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("pump thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ReadPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_pump(
    port: Arc<dyn SerialPort>,
    events: Arc<EventStream<SessionEvent>>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
) {
    debug!("read pump started");
    let mut buf = vec![0u8; READ_BUF_SIZE];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf, read_timeout) {
            Ok(0) => {
                // Timeout slice with no data
            }
            Ok(n) => {
                events.publish(SessionEvent::Data(buf[..n].to_vec()));
            }
            Err(e) => {
                warn!("read pump error: {}", e);
                events.publish(SessionEvent::ReadError {
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    debug!("read pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPort;

    fn pump_setup() -> (Arc<MockPort>, Arc<EventStream<SessionEvent>>) {
        let port = Arc::new(MockPort::new());
        port.force_open();
        (port, Arc::new(EventStream::new(16)))
    }

    #[test]
    fn test_pump_forwards_chunks_in_order() {
        let (port, events) = pump_setup();
        port.push_read(vec![1, 2, 3]);
        port.push_read(vec![4, 5]);
        let rx = events.subscribe();

        let pump = ReadPump::start(
            "pump-test",
            port.clone() as Arc<dyn SerialPort>,
            Arc::clone(&events),
            Duration::from_millis(5),
        )
        .unwrap();

        let SessionEvent::Data(first) = rx.recv_blocking().unwrap() else {
            panic!("expected data event");
        };
        let SessionEvent::Data(second) = rx.recv_blocking().unwrap() else {
            panic!("expected data event");
        };
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5]);

        pump.stop();
    }

    #[test]
    fn test_pump_reports_read_error_as_event() {
        let (port, events) = pump_setup();
        port.fail_next_read("device disconnected");
        let rx = events.subscribe();

        let pump = ReadPump::start(
            "pump-test",
            port.clone() as Arc<dyn SerialPort>,
            Arc::clone(&events),
            Duration::from_millis(5),
        )
        .unwrap();

        let SessionEvent::ReadError { message } = rx.recv_blocking().unwrap() else {
            panic!("expected read error event");
        };
        assert!(message.contains("device disconnected"));

        pump.stop();
    }

    #[test]
    fn test_stop_is_synchronous() {
        let (port, events) = pump_setup();
        let rx = events.subscribe();

        let pump = ReadPump::start(
            "pump-test",
            port.clone() as Arc<dyn SerialPort>,
            Arc::clone(&events),
            Duration::from_millis(5),
        )
        .unwrap();

        pump.stop();

        // Nothing queued after stop returns, even if data shows up later
        port.push_read(vec![9, 9, 9]);
        std::thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
    }
}
