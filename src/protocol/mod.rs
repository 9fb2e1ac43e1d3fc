//! Protocol module - wire format, framing, and payload layouts.
//!
//! This module implements the binary protocol spoken over the tunnel:
//! - 1 or 5 byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct and per-opcode payload encoders/decoders

mod frame;
mod frame_buffer;
pub mod payload;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    EncodedHeader, Header, OpCode, COMPACT_HEADER_SIZE, COMPACT_MAX_LEN, DEFAULT_MAX_PAYLOAD_SIZE,
    EXTENDED_HEADER_SIZE, EXTENDED_LEN_MARKER,
};
