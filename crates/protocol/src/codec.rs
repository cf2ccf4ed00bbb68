//! Message serialization and deserialization using postcard
//!
//! Messages are serialized with postcard (compact binary format) and
//! framed with a length prefix for transport over the bridge's message
//! channels.
//!
//! # Frame Format
//!
//! ```text
//! [Length: u32 (big-endian)][Message bytes (postcard serialized)]
//! ```
//!
//! Frames are capped at 1 MiB; serial payloads are small and a device
//! list never comes close to the limit.

use crate::{CURRENT_VERSION, Message, ProtocolVersion, error::ProtocolError, error::Result};
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum allowed frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode a message to bytes using postcard
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, ControlRequest, CURRENT_VERSION, encode_message};
///
/// let msg = Message {
///     version: CURRENT_VERSION,
///     payload: MessagePayload::Request(ControlRequest::ListDevices),
/// };
/// let bytes = encode_message(&msg).unwrap();
/// assert!(!bytes.is_empty());
/// ```
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    postcard::to_allocvec(message).map_err(ProtocolError::from)
}

/// Decode a message from bytes using postcard
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}

/// Validate protocol version compatibility
///
/// Major versions must match; minor version differences are tolerated
/// in both directions.
pub fn validate_version(message_version: &ProtocolVersion) -> Result<()> {
    if !message_version.interoperates_with(&CURRENT_VERSION) {
        return Err(ProtocolError::IncompatibleVersion {
            major: message_version.major,
            minor: message_version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }
    Ok(())
}

/// Encode a message with length prefix for framing
pub fn encode_framed(message: &Message) -> Result<Vec<u8>> {
    let message_bytes = encode_message(message)?;
    let message_len = message_bytes.len();

    if message_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: message_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(4 + message_len);
    frame.extend_from_slice(&(message_len as u32).to_be_bytes());
    frame.extend_from_slice(&message_bytes);

    Ok(frame)
}

/// Decode a framed message
///
/// Expects frame format: [4-byte length (big-endian)][postcard message bytes]
pub fn decode_framed(frame: &[u8]) -> Result<Message> {
    if frame.len() < 4 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4,
            actual: frame.len(),
        });
    }

    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if frame.len() < 4 + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4 + length,
            actual: frame.len(),
        });
    }

    decode_message(&frame[4..4 + length])
}

/// Write a framed message to a writer
pub fn write_framed<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let framed = encode_framed(message)?;
    writer.write_all(&framed)?;
    Ok(())
}

/// Read a framed message from a reader
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Message> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let length = u32::from_be_bytes(len_bytes) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut message_bytes = vec![0u8; length];
    reader.read_exact(&mut message_bytes)?;

    decode_message(&message_bytes)
}

/// Async: Write a framed message to an async writer
#[cfg(feature = "async")]
pub async fn write_framed_async<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let framed = encode_framed(message)?;
    writer.write_all(&framed).await?;
    Ok(())
}

/// Async: Read a framed message from an async reader
#[cfg(feature = "async")]
pub async fn read_framed_async<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let length = u32::from_be_bytes(len_bytes) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut message_bytes = vec![0u8; length];
    reader.read_exact(&mut message_bytes).await?;

    decode_message(&message_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ControlRequest, ControlResponse, MessagePayload,
        types::{DeviceId, DeviceInfo, HotplugAction, HotplugEvent, SessionEvent},
    };
    use std::io::Cursor;

    fn device(id: u32) -> DeviceInfo {
        DeviceInfo {
            device_id: DeviceId(id),
            vendor_id: 0x1a86,
            product_id: 0x7523,
            device_name: format!("/dev/bus/usb/001/{:03}", id),
            manufacturer: Some("QinHeng Electronics".to_string()),
            product: Some("CH340 serial converter".to_string()),
            serial_number: None,
            interface_count: 1,
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Request(ControlRequest::Create {
                driver: None,
                vid: 0x1a86,
                pid: 0x7523,
                device_id: 1,
                port: Some(0),
            }),
        };

        let bytes = encode_message(&msg).unwrap();
        let decoded = decode_message(&bytes).unwrap();

        assert_eq!(msg.version, decoded.version);
        let MessagePayload::Request(ControlRequest::Create { driver, vid, pid, .. }) =
            decoded.payload
        else {
            panic!("expected Create request");
        };
        assert!(driver.is_none());
        assert_eq!((vid, pid), (0x1a86, 0x7523));
    }

    #[test]
    fn test_device_list_roundtrip() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Response(ControlResponse::Devices(vec![
                device(1),
                DeviceInfo {
                    serial_number: Some("A1B2C3".to_string()),
                    ..device(2)
                },
            ])),
        };

        let bytes = encode_message(&msg).unwrap();
        let decoded = decode_message(&bytes).unwrap();

        let MessagePayload::Response(ControlResponse::Devices(devices)) = decoded.payload else {
            panic!("expected Devices response");
        };
        assert_eq!(devices.len(), 2);
        assert!(devices[0].serial_number.is_none());
        assert_eq!(devices[1].serial_number.as_deref(), Some("A1B2C3"));
    }

    #[test]
    fn test_session_data_roundtrip() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Session {
                channel_name: "usb-serial-bridge/session/1".to_string(),
                event: SessionEvent::Data(vec![0x41, 0x42, 0x0d, 0x0a]),
            },
        };

        let framed = encode_framed(&msg).unwrap();
        let decoded = decode_framed(&framed).unwrap();

        let MessagePayload::Session { channel_name, event } = decoded.payload else {
            panic!("expected Session push");
        };
        assert_eq!(channel_name, "usb-serial-bridge/session/1");
        let SessionEvent::Data(data) = event else {
            panic!("expected Data event");
        };
        assert_eq!(data, vec![0x41, 0x42, 0x0d, 0x0a]);
    }

    #[test]
    fn test_hotplug_roundtrip() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Hotplug(HotplugEvent {
                action: HotplugAction::Attached,
                device: device(3),
            }),
        };

        let bytes = encode_message(&msg).unwrap();
        let decoded = decode_message(&bytes).unwrap();

        let MessagePayload::Hotplug(event) = decoded.payload else {
            panic!("expected Hotplug push");
        };
        assert_eq!(event.action, HotplugAction::Attached);
        assert_eq!(event.device.device_id, DeviceId(3));
    }

    #[test]
    fn test_framed_incomplete_frame() {
        let incomplete = vec![0, 0, 0, 10]; // Says 10 bytes but provides none
        let result = decode_framed(&incomplete);
        let Err(ProtocolError::IncompleteFrame { expected, actual }) = result else {
            panic!("Expected IncompleteFrame error, got {:?}", result);
        };
        assert_eq!(expected, 14);
        assert_eq!(actual, 4);
    }

    #[test]
    fn test_framed_too_large() {
        let too_large = vec![0xFF, 0xFF, 0xFF, 0xFF]; // 4GB frame
        let result = decode_framed(&too_large);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_empty_frame() {
        let empty: &[u8] = &[];
        let result = decode_framed(empty);
        assert!(matches!(result, Err(ProtocolError::IncompleteFrame { .. })));
    }

    #[test]
    fn test_write_read_framed() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Response(ControlResponse::Opened(true)),
        };

        let mut buffer = Vec::new();
        write_framed(&mut buffer, &msg).unwrap();

        let mut cursor = Cursor::new(buffer);
        let decoded = read_framed(&mut cursor).unwrap();

        assert_eq!(msg.version, decoded.version);
        assert!(matches!(
            decoded.payload,
            MessagePayload::Response(ControlResponse::Opened(true))
        ));
    }

    #[test]
    fn test_validate_version_compatible() {
        assert!(validate_version(&CURRENT_VERSION).is_ok());
        let newer_minor = ProtocolVersion {
            major: CURRENT_VERSION.major,
            minor: CURRENT_VERSION.minor + 1,
            patch: 0,
        };
        assert!(validate_version(&newer_minor).is_ok());
    }

    #[test]
    fn test_validate_version_incompatible_major() {
        let v2_0 = ProtocolVersion {
            major: CURRENT_VERSION.major + 1,
            minor: 0,
            patch: 0,
        };
        assert!(matches!(
            validate_version(&v2_0),
            Err(ProtocolError::IncompatibleVersion { .. })
        ));
    }
}
