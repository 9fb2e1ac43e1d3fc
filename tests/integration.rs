//! Integration tests for serialwire-client.
//!
//! These tests verify the codec and payload modules working together.

use bytes::Bytes;
use serialwire_client::protocol::{
    build_frame, payload, Frame, FrameBuffer, OpCode, COMPACT_HEADER_SIZE, EXTENDED_HEADER_SIZE,
};

const LENGTHS: [usize; 6] = [0, 1, 30, 31, 1000, 1 << 20];

/// Every opcode survives encode/decode at every interesting length.
#[test]
fn test_frame_cycle_all_opcodes_and_lengths() {
    for opcode in OpCode::ALL {
        for len in LENGTHS {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let bytes = build_frame(opcode, &payload).unwrap();

            let header_size = if len <= 30 {
                COMPACT_HEADER_SIZE
            } else {
                EXTENDED_HEADER_SIZE
            };
            assert_eq!(bytes.len(), header_size + len, "{} with {} bytes", opcode, len);

            let mut buffer = FrameBuffer::new();
            let frames = buffer.push(&bytes).unwrap();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].opcode(), opcode);
            assert_eq!(frames[0].payload(), &payload[..]);
            assert!(buffer.is_empty());
        }
    }
}

/// Test multiple frames in sequence.
#[test]
fn test_multiple_frames_sequence() {
    let mut buffer = FrameBuffer::new();
    let mut all_bytes = Vec::new();

    for txid in 0u32..5 {
        let frame = Frame::stream("COM5", txid, format!("chunk_{}", txid).as_bytes()).unwrap();
        all_bytes.extend(frame.encode().unwrap());
    }

    let frames = buffer.push(&all_bytes).unwrap();
    assert_eq!(frames.len(), 5);

    for (i, frame) in frames.into_iter().enumerate() {
        assert_eq!(frame.opcode(), OpCode::Stream);
        let stream = payload::parse_stream(frame.payload).unwrap();
        assert_eq!(stream.port, "COM5");
        assert_eq!(stream.txid, i as u32);
        assert_eq!(stream.data, Bytes::from(format!("chunk_{}", i)));
    }
}

/// A server reply sequence for one port session.
#[test]
fn test_session_reply_sequence() {
    let replies = [
        Frame::new(OpCode::Opened, payload::port_name("COM5").unwrap()),
        Frame::new(OpCode::RxConfirm, payload::confirm("COM5", 7).unwrap()),
        Frame::new(OpCode::TxConfirm, payload::confirm("COM5", 7).unwrap()),
        Frame::new(OpCode::Error, payload::error(Some("COM5"), "parity").unwrap()),
        Frame::new(OpCode::Closed, payload::port_name("COM5").unwrap()),
    ];
    let bytes: Vec<u8> = replies
        .iter()
        .flat_map(|frame| frame.encode().unwrap())
        .collect();

    let mut buffer = FrameBuffer::new();
    let frames = buffer.push(&bytes).unwrap();
    assert_eq!(frames, replies);

    let confirm = payload::parse_confirm(frames[2].payload.clone()).unwrap();
    assert_eq!((confirm.port.as_str(), confirm.txid), ("COM5", 7));

    let error = payload::parse_error(frames[3].payload.clone()).unwrap();
    assert_eq!(error.port.as_deref(), Some("COM5"));
    assert_eq!(error.message, "parity");
}

/// Test fragmented frame parsing.
#[test]
fn test_fragmented_frame_parsing() {
    let data = vec![0x55u8; 100];
    let frame_bytes = Frame::stream("COM5", 1, &data).unwrap().encode().unwrap();

    let mut buffer = FrameBuffer::new();

    // Push header in parts
    assert!(buffer.push(&frame_bytes[..1]).unwrap().is_empty());
    assert!(buffer.push(&frame_bytes[1..EXTENDED_HEADER_SIZE]).unwrap().is_empty());
    assert!(buffer.has_partial_frame());

    // Push payload in parts
    let mid = EXTENDED_HEADER_SIZE + 40;
    assert!(buffer.push(&frame_bytes[EXTENDED_HEADER_SIZE..mid]).unwrap().is_empty());

    // Final part completes the frame
    let frames = buffer.push(&frame_bytes[mid..]).unwrap();
    assert_eq!(frames.len(), 1);

    let stream = payload::parse_stream(frames[0].payload.clone()).unwrap();
    assert_eq!(stream.data.len(), 100);
}

/// Feeding one byte at a time yields the same frames.
#[test]
fn test_byte_by_byte_parsing() {
    let frames_in = [
        Frame::open("COM1", 9600).unwrap(),
        Frame::stream("COM1", 0, &[0xAB; 64]).unwrap(),
        Frame::close("COM1").unwrap(),
    ];
    let bytes: Vec<u8> = frames_in
        .iter()
        .flat_map(|frame| frame.encode().unwrap())
        .collect();

    let mut buffer = FrameBuffer::new();
    let mut frames_out = Vec::new();
    for byte in bytes {
        frames_out.extend(buffer.push(&[byte]).unwrap());
    }
    assert_eq!(frames_out, frames_in);

    let open = payload::parse_open(frames_out[0].payload.clone()).unwrap();
    assert_eq!((open.port.as_str(), open.baud), ("COM1", 9600));
}
