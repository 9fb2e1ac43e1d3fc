//! Wire format encoding and decoding.
//!
//! Every frame starts with a single header byte:
//! ```text
//! ┌───────────────────────┬──────────────┐
//! │ Length  (bits 3..7)   │ Opcode (0..2)│
//! │ 0..=30 or 31 = escape │ 0..=7        │
//! └───────────────────────┴──────────────┘
//! ```
//!
//! If the 5-bit length field reads 31, the real payload length follows as a
//! 4-byte big-endian unsigned integer. The payload comes right after.

use std::fmt;

use crate::error::{Result, SerialWireError};

/// Largest payload length that fits into the compact header.
pub const COMPACT_MAX_LEN: u32 = 30;

/// Length field value signalling an extended 4-byte length.
pub const EXTENDED_LEN_MARKER: u8 = 31;

/// Size of the compact header (opcode + short length).
pub const COMPACT_HEADER_SIZE: usize = 1;

/// Size of the extended header (header byte + u32 length).
pub const EXTENDED_HEADER_SIZE: usize = 5;

/// Default maximum accepted payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

const OPCODE_MASK: u8 = 0b0000_0111;
const LENGTH_SHIFT: u8 = 3;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Error report, optionally naming a port.
    Error = 0x0,
    /// Request to open a port.
    Open = 0x1,
    /// Port was opened.
    Opened = 0x2,
    /// Request to close a port.
    Close = 0x3,
    /// Port was closed.
    Closed = 0x4,
    /// Serial data for a port.
    Stream = 0x5,
    /// Data of a STREAM frame was written to the serial port.
    TxConfirm = 0x6,
    /// Data of a STREAM frame was received by the peer.
    RxConfirm = 0x7,
}

impl OpCode {
    /// All opcodes in wire order.
    pub const ALL: [OpCode; 8] = [
        OpCode::Error,
        OpCode::Open,
        OpCode::Opened,
        OpCode::Close,
        OpCode::Closed,
        OpCode::Stream,
        OpCode::TxConfirm,
        OpCode::RxConfirm,
    ];

    /// Opcode stored in the lower three bits of a header byte.
    #[inline]
    pub fn from_header_byte(byte: u8) -> Self {
        Self::ALL[usize::from(byte & OPCODE_MASK)]
    }

    /// Opcode for a raw value, `None` if it does not fit in three bits.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Raw wire value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Protocol name of the opcode.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Error => "ERROR",
            OpCode::Open => "OPEN",
            OpCode::Opened => "OPENED",
            OpCode::Close => "CLOSE",
            OpCode::Closed => "CLOSED",
            OpCode::Stream => "STREAM",
            OpCode::TxConfirm => "TX_CONFIRM",
            OpCode::RxConfirm => "RX_CONFIRM",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload length in bytes.
    pub payload_length: u32,
}

/// Header bytes ready to be written, either 1 or 5 bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedHeader {
    buf: [u8; EXTENDED_HEADER_SIZE],
    len: usize,
}

impl EncodedHeader {
    /// The encoded header bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of header bytes (1 or 5).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false, a header has at least one byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for EncodedHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Header {
    /// Create a new header.
    pub fn new(opcode: OpCode, payload_length: u32) -> Self {
        Self {
            opcode,
            payload_length,
        }
    }

    /// Create a header for a payload of `len` bytes.
    ///
    /// Fails if the length does not fit in a 32-bit unsigned integer.
    pub fn for_payload(opcode: OpCode, len: usize) -> Result<Self> {
        let payload_length = u32::try_from(len).map_err(|_| {
            SerialWireError::Protocol(format!("Payload size {} exceeds u32::MAX", len))
        })?;
        Ok(Self::new(opcode, payload_length))
    }

    /// Whether this header needs the 4-byte extended length.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.payload_length > COMPACT_MAX_LEN
    }

    /// Encoded size of this header in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        if self.is_extended() {
            EXTENDED_HEADER_SIZE
        } else {
            COMPACT_HEADER_SIZE
        }
    }

    /// Encode the header.
    ///
    /// # Example
    ///
    /// ```
    /// use serialwire_client::protocol::{Header, OpCode};
    ///
    /// let short = Header::new(OpCode::Close, 6).encode();
    /// assert_eq!(short.as_bytes(), &[0x03 | (6 << 3)]);
    ///
    /// let long = Header::new(OpCode::Stream, 1000).encode();
    /// assert_eq!(long.as_bytes(), &[0x05 | (31 << 3), 0, 0, 0x03, 0xE8]);
    /// ```
    pub fn encode(&self) -> EncodedHeader {
        let mut buf = [0u8; EXTENDED_HEADER_SIZE];
        let opcode = self.opcode.as_u8() & OPCODE_MASK;

        if self.is_extended() {
            buf[0] = opcode | (EXTENDED_LEN_MARKER << LENGTH_SHIFT);
            buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
            EncodedHeader {
                buf,
                len: EXTENDED_HEADER_SIZE,
            }
        } else {
            // payload_length <= 30 here, the cast cannot truncate
            buf[0] = opcode | ((self.payload_length as u8) << LENGTH_SHIFT);
            EncodedHeader {
                buf,
                len: COMPACT_HEADER_SIZE,
            }
        }
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupied, or `None` if
    /// `buf` does not hold a complete header yet.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let first = *buf.first()?;
        let opcode = OpCode::from_header_byte(first);
        let short_len = first >> LENGTH_SHIFT;

        if short_len == EXTENDED_LEN_MARKER {
            if buf.len() < EXTENDED_HEADER_SIZE {
                return None;
            }
            let payload_length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            Some((Self::new(opcode, payload_length), EXTENDED_HEADER_SIZE))
        } else {
            Some((
                Self::new(opcode, u32::from(short_len)),
                COMPACT_HEADER_SIZE,
            ))
        }
    }

    /// Validate the payload length against a maximum.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(SerialWireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }
}
