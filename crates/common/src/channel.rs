//! Async channel bridge between the Tokio side and the blocking worker
//!
//! The framework-facing side of the plugin runs async; device and
//! session operations run on one blocking worker thread. Control calls
//! cross as `ControlRequest`/`ControlResponse` pairs with a oneshot for
//! the reply. Event subscriptions cannot cross a wire (they hand back a
//! live receiver), so they travel as dedicated commands next to the
//! serializable calls.

use async_channel::{Receiver, Sender, bounded};
use protocol::{ControlRequest, ControlResponse, HotplugEvent, SessionEvent};

/// Commands from the Tokio side to the worker thread
#[derive(Debug)]
pub enum BridgeCommand {
    /// A control-channel call with its reply slot
    Call {
        /// The request, exactly as it would arrive off the wire
        request: ControlRequest,
        /// Channel to send the response back
        response: tokio::sync::oneshot::Sender<ControlResponse>,
    },

    /// Subscribe to hotplug events
    ///
    /// The returned receiver is the single active sink; subscribing
    /// again detaches the previous receiver.
    SubscribeHotplug {
        /// Channel to send the event receiver back
        response: tokio::sync::oneshot::Sender<Receiver<HotplugEvent>>,
    },

    /// Subscribe to a session's data/error events
    SubscribeSession {
        /// Session channel name from `Create`
        channel_name: String,
        /// Receiver on success, `None` when the session does not exist
        response: tokio::sync::oneshot::Sender<Option<Receiver<SessionEvent>>>,
    },

    /// Shut the worker thread down gracefully
    Shutdown,
}

/// Handle for the Tokio side (async)
#[derive(Clone)]
pub struct BridgeHandle {
    cmd_tx: Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Send a raw command to the worker
    pub async fn send(&self, cmd: BridgeCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Issue a control call and wait for its response
    pub async fn call(&self, request: ControlRequest) -> crate::Result<ControlResponse> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(BridgeCommand::Call {
            request,
            response: tx,
        })
        .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Subscribe to hotplug events, replacing any prior subscriber
    pub async fn subscribe_hotplug(&self) -> crate::Result<Receiver<HotplugEvent>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(BridgeCommand::SubscribeHotplug { response: tx })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Subscribe to a session's events, replacing any prior subscriber
    pub async fn subscribe_session(
        &self,
        channel_name: &str,
    ) -> crate::Result<Receiver<SessionEvent>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(BridgeCommand::SubscribeSession {
            channel_name: channel_name.to_string(),
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|e| crate::Error::Channel(e.to_string()))?
            .ok_or_else(|| crate::Error::SessionNotFound(channel_name.to_string()))
    }

    /// Ask the worker to shut down
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send(BridgeCommand::Shutdown).await
    }
}

/// Handle for the worker thread (blocking)
pub struct WorkerEndpoint {
    cmd_rx: Receiver<BridgeCommand>,
}

impl WorkerEndpoint {
    /// Receive a command, blocking until one arrives
    pub fn recv_command(&self) -> crate::Result<BridgeCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<BridgeCommand> {
        self.cmd_rx.try_recv().ok()
    }
}

/// Create the channel bridge between Tokio and the worker thread
///
/// Returns (BridgeHandle for Tokio, WorkerEndpoint for the worker)
pub fn create_bridge() -> (BridgeHandle, WorkerEndpoint) {
    let (cmd_tx, cmd_rx) = bounded(256);

    (BridgeHandle { cmd_tx }, WorkerEndpoint { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ControlRequest;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (handle, endpoint) = create_bridge();

        // Simulate the blocking worker on a plain thread
        let worker = std::thread::spawn(move || {
            let cmd = endpoint.recv_command().unwrap();
            let BridgeCommand::Call { request, response } = cmd else {
                return false;
            };
            let ok = matches!(request, ControlRequest::ListDevices);
            let _ = response.send(ControlResponse::Devices(Vec::new()));
            ok
        });

        let response = handle.call(ControlRequest::ListDevices).await.unwrap();
        assert!(matches!(response, ControlResponse::Devices(ref d) if d.is_empty()));
        assert!(worker.join().unwrap());
    }

    #[tokio::test]
    async fn test_call_fails_when_worker_gone() {
        let (handle, endpoint) = create_bridge();
        drop(endpoint);

        let result = handle.call(ControlRequest::ListDevices).await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }
}
