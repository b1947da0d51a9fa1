//! Length-prefixed framing over a streaming receive buffer
//!
//! Frames are `u32` big-endian length + payload. Decoding operates on a
//! caller-owned [`BytesMut`]: complete frames are drained from the front and
//! any partial tail stays in the buffer for the next read, so no bytes are
//! ever discarded regardless of how the stream is chunked.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Plausibility cap on a declared frame length
///
/// Sensor payloads are short command strings; anything near this bound means
/// a desynchronized or hostile peer and the connection must be closed.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// One raw frame as taken off the wire
///
/// The relay forwards these verbatim without going through the command
/// grammar, which is why the payload stays as opaque bytes here.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Payload bytes, exactly as declared by the length prefix
    pub payload: Bytes,
}

impl Frame {
    /// Re-encode this frame, length prefix included
    pub fn to_wire(&self) -> Vec<u8> {
        encode_raw_frame(&self.payload)
    }
}

/// Encode a command into a complete wire frame
pub fn encode_frame(command: &crate::Command) -> Vec<u8> {
    encode_raw_frame(command.to_payload().as_bytes())
}

/// Frame arbitrary payload bytes with the 4-byte big-endian length prefix
pub fn encode_raw_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(payload);
    out
}

/// Drain every complete frame from the front of `buf`
///
/// Returns the frames consumed so far. A declared length exceeding bytes
/// currently buffered is not an error - the partial frame (prefix included)
/// stays in `buf` until more input arrives. A declared length above
/// [`MAX_FRAME_LEN`] is a [`ProtocolError::FrameTooLarge`]; frames decoded
/// before the oversize prefix are lost with the connection, which is
/// acceptable because the stream is unrecoverable at that point.
pub fn drain_frames(buf: &mut BytesMut) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    loop {
        if buf.len() < LEN_PREFIX {
            return Ok(frames);
        }
        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if declared > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                max: MAX_FRAME_LEN,
            });
        }
        if buf.len() < LEN_PREFIX + declared {
            return Ok(frames);
        }
        buf.advance(LEN_PREFIX);
        let payload = buf.split_to(declared).freeze();
        frames.push(Frame { payload });
    }
}
