//! Payload layouts for every opcode.
//!
//! All strings are length-prefixed: a 2-byte big-endian byte count followed
//! by UTF-8 bytes. Integers are big-endian.
//!
//! ```text
//! OPEN        baud:u32  name:str
//! CLOSE       name:str
//! OPENED      name:str
//! CLOSED      name:str
//! STREAM      name:str  txid:u32  data:[u8]   (data runs to end of payload)
//! TX_CONFIRM  name:str  txid:u32
//! RX_CONFIRM  name:str  txid:u32
//! ERROR       [name:str] message:str         (single string = message only)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Frame, OpCode};
use crate::error::{RemoteError, Result, SerialWireError};

/// Append a length-prefixed string.
pub fn put_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        SerialWireError::Protocol(format!("String of {} bytes is too long", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Read a length-prefixed string from the front of `buf`.
pub fn get_str(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(truncated("string length"));
    }
    let len = usize::from(buf.get_u16());
    if buf.remaining() < len {
        return Err(truncated("string"));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| SerialWireError::Protocol("String is not valid UTF-8".to_string()))
}

fn get_u32(buf: &mut Bytes, what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    Ok(buf.get_u32())
}

fn truncated(what: &str) -> SerialWireError {
    SerialWireError::Protocol(format!("Truncated payload: missing {}", what))
}

/// Build the payload of an OPEN request.
pub fn open(port: &str, baud: u32) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(6 + port.len());
    buf.put_u32(baud);
    put_str(&mut buf, port)?;
    Ok(buf.freeze())
}

/// Build a payload consisting of just a port name (CLOSE, OPENED, CLOSED).
pub fn port_name(port: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + port.len());
    put_str(&mut buf, port)?;
    Ok(buf.freeze())
}

/// Build the payload of a STREAM frame.
pub fn stream(port: &str, txid: u32, data: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(6 + port.len() + data.len());
    put_str(&mut buf, port)?;
    buf.put_u32(txid);
    buf.put_slice(data);
    Ok(buf.freeze())
}

/// Build the payload of a TX_CONFIRM or RX_CONFIRM frame.
pub fn confirm(port: &str, txid: u32) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(6 + port.len());
    put_str(&mut buf, port)?;
    buf.put_u32(txid);
    Ok(buf.freeze())
}

/// Build the payload of an ERROR frame.
pub fn error(port: Option<&str>, message: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(4 + message.len() + port.map_or(0, str::len));
    if let Some(port) = port {
        put_str(&mut buf, port)?;
    }
    put_str(&mut buf, message)?;
    Ok(buf.freeze())
}

/// Decoded OPEN payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Requested baud rate.
    pub baud: u32,
    /// Port name.
    pub port: String,
}

/// Decoded STREAM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData {
    /// Port name.
    pub port: String,
    /// Transaction id.
    pub txid: u32,
    /// Serial data (empty for keep-alive).
    pub data: Bytes,
}

/// Decoded TX_CONFIRM / RX_CONFIRM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Port name.
    pub port: String,
    /// Transaction id.
    pub txid: u32,
}

/// Parse an OPEN payload.
pub fn parse_open(mut payload: Bytes) -> Result<OpenRequest> {
    let baud = get_u32(&mut payload, "baud rate")?;
    let port = get_str(&mut payload)?;
    Ok(OpenRequest { baud, port })
}

/// Parse a payload holding a single port name.
pub fn parse_port_name(mut payload: Bytes) -> Result<String> {
    get_str(&mut payload)
}

/// Parse a STREAM payload. The data is a zero-copy slice of `payload`.
pub fn parse_stream(mut payload: Bytes) -> Result<StreamData> {
    let port = get_str(&mut payload)?;
    let txid = get_u32(&mut payload, "transaction id")?;
    Ok(StreamData {
        port,
        txid,
        data: payload,
    })
}

/// Parse a TX_CONFIRM / RX_CONFIRM payload.
pub fn parse_confirm(mut payload: Bytes) -> Result<Confirmation> {
    let port = get_str(&mut payload)?;
    let txid = get_u32(&mut payload, "transaction id")?;
    Ok(Confirmation { port, txid })
}

/// Parse an ERROR payload.
///
/// One string is a connection-level message, two strings are a port name
/// followed by the message. An empty payload yields an empty global message.
pub fn parse_error(mut payload: Bytes) -> Result<RemoteError> {
    if !payload.has_remaining() {
        return Ok(RemoteError::new(None, String::new()));
    }
    let first = get_str(&mut payload)?;
    if !payload.has_remaining() {
        return Ok(RemoteError::new(None, first));
    }
    let message = get_str(&mut payload)?;
    Ok(RemoteError::new(Some(first), message))
}

/// Convenience constructors for complete request frames.
impl Frame {
    /// OPEN request frame.
    pub fn open(port: &str, baud: u32) -> Result<Self> {
        Ok(Frame::new(OpCode::Open, open(port, baud)?))
    }

    /// CLOSE request frame.
    pub fn close(port: &str) -> Result<Self> {
        Ok(Frame::new(OpCode::Close, port_name(port)?))
    }

    /// STREAM frame.
    pub fn stream(port: &str, txid: u32, data: &[u8]) -> Result<Self> {
        Ok(Frame::new(OpCode::Stream, stream(port, txid, data)?))
    }

    /// RX_CONFIRM frame.
    pub fn rx_confirm(port: &str, txid: u32) -> Result<Self> {
        Ok(Frame::new(OpCode::RxConfirm, confirm(port, txid)?))
    }
}
