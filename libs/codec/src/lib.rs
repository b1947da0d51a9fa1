//! # RSP Codec - Remote Sensor Protocol Rules Layer
//!
//! ## Purpose
//!
//! This crate contains the "rules" layer of the RSP bridge:
//! - Length-prefixed frame encoding/decoding over a streaming byte buffer
//! - The command grammar (`sensor-update`, `broadcast`, `group`)
//! - The tagged value type carried by sensor updates
//!
//! ## Architecture Role
//!
//! ```text
//! adapter workers → [rsp-codec] → connection manager / relay server
//!       ↑               ↓                  ↓
//!   Typed Values   Protocol Rules      Transport
//!   Command enum   Framing/Grammar     Sockets
//! ```
//!
//! ## Wire Format
//!
//! Every message is a 4-byte big-endian unsigned length `N` followed by
//! exactly `N` bytes of UTF-8 payload. Payload grammar:
//!
//! ```text
//! sensor-update "<name>" <value> [ "<name>" <value> ... ]
//! broadcast "<event>"
//! group "<group-name>"
//! ```
//!
//! A `<value>` is either a quoted string or a bare numeric/boolean literal.
//! Inside quoted strings a literal `"` is written as a doubled `""`.
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (lives in rsp-runtime/rsp-relay)
//! - Adapter lifecycle or routing logic

pub mod command;
pub mod error;
pub mod framing;

pub use command::{parse_command, Command, SensorValue, Value};
pub use error::ProtocolError;
pub use framing::{drain_frames, encode_frame, encode_raw_frame, Frame, MAX_FRAME_LEN};

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
