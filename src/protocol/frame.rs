//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with opcode and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use serialwire_client::protocol::{Frame, OpCode};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(OpCode::Opened, Bytes::from_static(b"\x00\x04COM5"));
//!
//! assert_eq!(frame.opcode(), OpCode::Opened);
//! assert_eq!(frame.payload_len(), 6);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, OpCode};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from opcode and payload.
    pub fn new(opcode: OpCode, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    /// Create a frame from opcode and raw bytes (copies data).
    pub fn from_parts(opcode: OpCode, payload: &[u8]) -> Self {
        Self {
            opcode,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get the opcode.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Header describing this frame.
    pub fn header(&self) -> Result<Header> {
        Header::for_payload(self.opcode, self.payload.len())
    }

    /// Serialize this frame into a contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        build_frame(self.opcode, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Fails if the payload is longer than `u32::MAX` bytes.
///
/// # Example
///
/// ```
/// use serialwire_client::protocol::{build_frame, OpCode};
///
/// let bytes = build_frame(OpCode::Stream, &[0u8; 40]).unwrap();
/// assert_eq!(bytes.len(), 5 + 40); // extended header + payload
/// ```
pub fn build_frame(opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_payload(opcode, payload.len())?.encode();
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}
