//! Protocol library for usb-serial-bridge
//!
//! This crate defines the message protocol spoken across the bridge's
//! control and event channels: type-safe request/response definitions,
//! event payloads, postcard serialization, and protocol versioning.
//!
//! # Example
//!
//! ```
//! use protocol::{Message, MessagePayload, ControlRequest, CURRENT_VERSION};
//! use protocol::{encode_message, decode_message};
//!
//! let msg = Message {
//!     version: CURRENT_VERSION,
//!     payload: MessagePayload::Request(ControlRequest::ListDevices),
//! };
//!
//! let bytes = encode_message(&msg).unwrap();
//! let decoded = decode_message(&bytes).unwrap();
//! assert_eq!(decoded.version, CURRENT_VERSION);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, decode_framed, decode_message, encode_framed, encode_message, read_framed,
    validate_version, write_framed,
};

#[cfg(feature = "async")]
pub use codec::{read_framed_async, write_framed_async};
pub use error::{ProtocolError, Result};
pub use messages::{ControlRequest, ControlResponse, ErrorKind, Message, MessagePayload};
pub use types::{
    DataBits, DeviceId, DeviceInfo, DriverType, HotplugAction, HotplugEvent, LineConfig, Parity,
    SessionEvent, StopBits,
};
pub use version::{CURRENT_VERSION, ProtocolVersion};
