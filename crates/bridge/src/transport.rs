//! Framed stream transport for the control surface
//!
//! Serves the bridge over any byte stream (unix socket, pipe pair,
//! in-process duplex): requests arrive as length-framed postcard
//! messages, get dispatched through a [`BridgeHandle`], and the
//! responses travel back the same way. Hotplug notifications and
//! session events are forwarded as pushes on the same stream,
//! interleaved between responses.
//!
//! Frames carrying an incompatible protocol version are answered with
//! a failure response instead of tearing the connection down.

use common::{BridgeHandle, Result};
use protocol::{
    CURRENT_VERSION, ControlResponse, ErrorKind, Message, MessagePayload, ProtocolError,
    read_framed_async, validate_version, write_framed_async,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outbound frames queued between dispatch and the writer
const OUTBOUND_BUFFER: usize = 64;

/// Serve one peer until it closes the stream
///
/// Requests are answered in order; a `Create` response additionally
/// subscribes the peer to the new session's events, so data starts
/// flowing as pushes once the session connects.
pub async fn serve_connection<S>(stream: S, handle: BridgeHandle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (out_tx, out_rx) = async_channel::bounded::<Message>(OUTBOUND_BUFFER);

    // All outbound frames leave through one ordered queue
    let writer_task = tokio::spawn(async move {
        while let Ok(message) = out_rx.recv().await {
            if let Err(e) = write_framed_async(&mut writer, &message).await {
                warn!("Frame write failed: {}", e);
                break;
            }
        }
    });

    let hotplug = handle.subscribe_hotplug().await?;
    let mut pushers: Vec<JoinHandle<()>> = Vec::new();
    {
        let out_tx = out_tx.clone();
        pushers.push(tokio::spawn(async move {
            while let Ok(event) = hotplug.recv().await {
                let push = Message {
                    version: CURRENT_VERSION,
                    payload: MessagePayload::Hotplug(event),
                };
                if out_tx.send(push).await.is_err() {
                    break;
                }
            }
        }));
    }

    let result = loop {
        let message = match read_framed_async(&mut reader).await {
            Ok(message) => message,
            Err(ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Transport peer closed the stream");
                break Ok(());
            }
            Err(e) => {
                warn!("Frame read failed: {}", e);
                break Ok(());
            }
        };

        if let Err(e) = validate_version(&message.version) {
            warn!("Rejecting frame: {}", e);
            let reply = Message {
                version: CURRENT_VERSION,
                payload: MessagePayload::Response(ControlResponse::Failed {
                    kind: ErrorKind::Channel,
                    message: e.to_string(),
                }),
            };
            if out_tx.send(reply).await.is_err() {
                break Ok(());
            }
            continue;
        }

        let MessagePayload::Request(request) = message.payload else {
            warn!("Ignoring non-request frame");
            continue;
        };

        let response = match handle.call(request).await {
            Ok(response) => response,
            Err(e) => break Err(e),
        };

        // A fresh session gets its events forwarded as pushes
        if let ControlResponse::Created { channel_name } = &response {
            match handle.subscribe_session(channel_name).await {
                Ok(events) => {
                    let out_tx = out_tx.clone();
                    let channel_name = channel_name.clone();
                    pushers.push(tokio::spawn(async move {
                        while let Ok(event) = events.recv().await {
                            let push = Message {
                                version: CURRENT_VERSION,
                                payload: MessagePayload::Session {
                                    channel_name: channel_name.clone(),
                                    event,
                                },
                            };
                            if out_tx.send(push).await.is_err() {
                                break;
                            }
                        }
                    }));
                }
                Err(e) => warn!("Session subscription failed: {}", e),
            }
        }

        let reply = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Response(response),
        };
        if out_tx.send(reply).await.is_err() {
            break Ok(());
        }
    };

    for pusher in pushers {
        pusher.abort();
    }
    drop(out_tx);
    let _ = writer_task.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::driver::{DriverFactory, Prober, SerialDriver};
    use crate::testing::{MockDriver, MockHost};
    use crate::worker::spawn_bridge_worker_with;
    use common::test_utils::mock_device_info;
    use protocol::{ControlRequest, DeviceId, DriverType, HotplugAction, ProtocolVersion,
        SessionEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.serial.read_timeout_ms = 5;
        config
    }

    fn prober_for(driver: Arc<MockDriver>) -> Prober {
        let mut prober = Prober::new();
        prober.register(DriverFactory::new(
            DriverType::Ch340,
            |device| device.vendor_id == 0x1a86,
            move |_| Ok(Arc::clone(&driver) as Arc<dyn SerialDriver>),
        ));
        prober
    }

    async fn send_request(stream: &mut DuplexStream, request: ControlRequest) {
        let message = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Request(request),
        };
        write_framed_async(stream, &message).await.unwrap();
    }

    async fn recv_frame(stream: &mut DuplexStream) -> Message {
        timeout(FRAME_TIMEOUT, read_framed_async(stream))
            .await
            .unwrap()
            .unwrap()
    }

    async fn call_over(stream: &mut DuplexStream, request: ControlRequest) -> ControlResponse {
        send_request(stream, request).await;
        let reply = recv_frame(stream).await;
        let MessagePayload::Response(response) = reply.payload else {
            panic!("expected response frame, got {:?}", reply.payload);
        };
        response
    }

    #[tokio::test]
    async fn test_request_response_over_stream() {
        let host = MockHost::new(vec![mock_device_info(1, 0x1a86, 0x7523)]);
        let (handle, thread) =
            spawn_bridge_worker_with(host, test_config(), Prober::new()).unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let serve = tokio::spawn(serve_connection(server, handle.clone()));

        send_request(&mut client, ControlRequest::ListDevices).await;
        let reply = recv_frame(&mut client).await;
        assert_eq!(reply.version, CURRENT_VERSION);
        let MessagePayload::Response(ControlResponse::Devices(devices)) = reply.payload else {
            panic!("expected Devices response");
        };
        assert_eq!(devices.len(), 1);

        drop(client);
        serve.await.unwrap().unwrap();
        handle.shutdown().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_incompatible_major_version() {
        let host = MockHost::new(Vec::new());
        let (handle, thread) =
            spawn_bridge_worker_with(host, test_config(), Prober::new()).unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let serve = tokio::spawn(serve_connection(server, handle.clone()));

        let message = Message {
            version: ProtocolVersion::new(CURRENT_VERSION.major + 1, 0, 0),
            payload: MessagePayload::Request(ControlRequest::ListDevices),
        };
        write_framed_async(&mut client, &message).await.unwrap();

        let reply = recv_frame(&mut client).await;
        let MessagePayload::Response(ControlResponse::Failed { kind, .. }) = reply.payload else {
            panic!("expected Failed response");
        };
        assert_eq!(kind, ErrorKind::Channel);

        // The connection survives the rejected frame
        let response = call_over(&mut client, ControlRequest::ListDevices).await;
        assert!(matches!(response, ControlResponse::Devices(_)));

        drop(client);
        serve.await.unwrap().unwrap();
        handle.shutdown().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_session_events_pushed_after_create() {
        let host = MockHost::new(vec![mock_device_info(1, 0x1a86, 0x7523)]);
        let driver = Arc::new(MockDriver::new(DriverType::Ch340, 1));
        let port = driver.port_mock(0);
        let (handle, thread) =
            spawn_bridge_worker_with(host, test_config(), prober_for(driver)).unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let serve = tokio::spawn(serve_connection(server, handle.clone()));

        let create = ControlRequest::Create {
            driver: None,
            vid: 0,
            pid: 0,
            device_id: 1,
            port: None,
        };
        let ControlResponse::Created { channel_name } = call_over(&mut client, create).await
        else {
            panic!("expected Created");
        };
        let response = call_over(
            &mut client,
            ControlRequest::Open {
                channel_name: channel_name.clone(),
            },
        )
        .await;
        assert!(matches!(response, ControlResponse::Opened(true)));
        let response = call_over(
            &mut client,
            ControlRequest::Connect {
                channel_name: channel_name.clone(),
            },
        )
        .await;
        assert!(matches!(response, ControlResponse::Connected(true)));

        port.push_read(vec![0xca, 0xfe]);
        let push = recv_frame(&mut client).await;
        let MessagePayload::Session {
            channel_name: pushed_name,
            event,
        } = push.payload
        else {
            panic!("expected session push, got {:?}", push.payload);
        };
        assert_eq!(pushed_name, channel_name);
        assert!(matches!(event, SessionEvent::Data(ref d) if d == &vec![0xca, 0xfe]));

        drop(client);
        serve.await.unwrap().unwrap();
        handle.shutdown().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_hotplug_events_pushed() {
        let host = MockHost::new(Vec::new());
        let (handle, thread) =
            spawn_bridge_worker_with(host.clone(), test_config(), Prober::new()).unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let serve = tokio::spawn(serve_connection(server, handle.clone()));

        // The hotplug subscription precedes the read loop, so a
        // round-trip guarantees it is in place before the attach
        let response = call_over(&mut client, ControlRequest::ListDevices).await;
        assert!(matches!(response, ControlResponse::Devices(_)));

        host.attach(mock_device_info(3, 0x1a86, 0x7523));
        let push = recv_frame(&mut client).await;
        let MessagePayload::Hotplug(event) = push.payload else {
            panic!("expected hotplug push, got {:?}", push.payload);
        };
        assert_eq!(event.action, HotplugAction::Attached);
        assert_eq!(event.device.device_id, DeviceId(3));

        drop(client);
        serve.await.unwrap().unwrap();
        handle.shutdown().await.unwrap();
        thread.join().unwrap();
    }
}
