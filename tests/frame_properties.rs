//! Frame format tests
//!
//! Exercises the wire format end to end through the public API:
//! 1. Known frame layouts
//! 2. Round trips for every message kind
//! 3. Single-bit corruption is always detected
//! 4. Stream splitting with the frame codec

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use ktane_bus::error::{Error, ProtocolError};
use ktane_bus::protocol::{
    byte_sum, checksum, FrameCodec, MessageType, Packet, Sound, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE,
};
use ktane_bus::types::{Address, SequenceNumber};

fn packet(kind: MessageType, seq: u8, payload: Vec<u8>) -> Packet {
    Packet::new(
        Address(0x10),
        Address::CONTROLLER,
        kind,
        SequenceNumber(seq),
        payload,
    )
    .unwrap()
}

// ============================================================================
// Known Layouts
// ============================================================================

#[test]
fn test_strike_frame_layout() {
    let frame = packet(MessageType::Strike, 3, vec![]).encode().unwrap();
    assert_eq!(frame, hex::decode("06100000000603e0ff").unwrap());
    assert_eq!(frame.len(), MIN_FRAME_SIZE);
}

#[test]
fn test_ack_frame_layout() {
    let ack = Packet::ack(Address::CONTROLLER, Address(0x10), SequenceNumber(3));
    let frame = ack.encode().unwrap();
    assert_eq!(&frame[..7], &[6, 0x00, 0x00, 0x10, 0x00, 2, 3]);

    let body_sum = byte_sum(&frame[..7]);
    assert_eq!(body_sum, 6 + 0x10 + 2 + 3);
    assert_eq!(checksum(&frame[..7]), 0xFFFF - body_sum);
    assert_eq!(u16::from_le_bytes([frame[7], frame[8]]), 0xFFFF - body_sum);
}

#[test]
fn test_sound_payload_frame() {
    let code = Sound::Morse('S').code().unwrap();
    let frame = packet(MessageType::Sound, 0, vec![code]).encode().unwrap();
    assert_eq!(frame[0], 7);
    assert_eq!(frame.len(), 10);

    let decoded = Packet::decode(&frame).unwrap();
    assert_eq!(decoded.sound(), Some(Sound::Morse('S')));
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_every_kind_round_trips() {
    for (i, kind) in MessageType::ALL.into_iter().enumerate() {
        let original = packet(kind, i as u8 * 19, vec![i as u8; i]);
        let decoded = Packet::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original, "{kind}");
    }
}

#[test]
fn test_largest_payload_round_trips() {
    let original = packet(MessageType::Status, 255, vec![0xFF; MAX_PAYLOAD_SIZE]);
    let frame = original.encode().unwrap();
    assert_eq!(frame[0], 255);
    assert_eq!(Packet::decode(&frame).unwrap(), original);

    assert!(matches!(
        Packet::new(
            Address(0x10),
            Address::CONTROLLER,
            MessageType::Status,
            SequenceNumber(0),
            vec![0; MAX_PAYLOAD_SIZE + 1],
        ),
        Err(Error::Protocol(ProtocolError::PayloadTooLarge { .. }))
    ));
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn test_every_single_bit_flip_detected() {
    let frames = [
        packet(MessageType::Strike, 3, vec![]).encode().unwrap(),
        packet(MessageType::Status, 200, vec![0x00, 0x7F, 0xFF]).encode().unwrap(),
    ];

    for frame in frames {
        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut damaged = frame.clone();
                damaged[index] ^= 1 << bit;

                let result = Packet::decode(&damaged);
                assert!(result.is_err(), "flip of byte {index} bit {bit} accepted");

                if index > 0 {
                    assert!(
                        matches!(
                            result,
                            Err(Error::Protocol(ProtocolError::ChecksumMismatch { .. }))
                        ),
                        "flip of byte {index} bit {bit}: {result:?}"
                    );
                }
            }
        }
    }
}

#[test]
fn test_short_and_undersized_frames_rejected() {
    assert!(Packet::decode(&[]).is_err());
    assert!(matches!(
        Packet::decode(&[5, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(Error::Protocol(ProtocolError::LengthTooSmall { length: 5, .. }))
    ));

    let frame = packet(MessageType::Stop, 1, vec![]).encode().unwrap();
    assert!(Packet::decode(&frame[..frame.len() - 1]).is_err());
}

#[test]
fn test_unknown_type_with_valid_checksum() {
    let mut frame = packet(MessageType::Stop, 1, vec![]).encode().unwrap();
    frame[5] = 13;
    let cs = checksum(&frame[..7]);
    frame[7..].copy_from_slice(&cs.to_le_bytes());

    assert!(matches!(
        Packet::decode(&frame),
        Err(Error::Protocol(ProtocolError::InvalidMessageType(13)))
    ));
}

// ============================================================================
// Stream Splitting
// ============================================================================

#[test]
fn test_codec_splits_back_to_back_frames() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(packet(MessageType::Strike, 1, vec![]), &mut buf).unwrap();
    codec.encode(packet(MessageType::Sound, 2, vec![7]), &mut buf).unwrap();

    // Feed the stream one byte at a time.
    let stream = buf.split();
    let mut rx = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in stream {
        rx.extend_from_slice(&[byte]);
        if let Some(packet) = codec.decode(&mut rx).unwrap() {
            decoded.push(packet);
        }
    }

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].seq, SequenceNumber(1));
    assert_eq!(decoded[1].payload, vec![7]);
    assert!(rx.is_empty());
}

#[test]
fn test_codec_recovers_after_bad_frame() {
    let mut codec = FrameCodec::new();
    let mut bad = packet(MessageType::Strike, 1, vec![]).encode().unwrap();
    bad[6] ^= 0x40;
    let good = packet(MessageType::Defused, 2, vec![]).encode().unwrap();

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x02]);
    buf.extend_from_slice(&bad);
    buf.extend_from_slice(&good);

    assert!(codec.decode(&mut buf).is_err());
    assert!(codec.decode(&mut buf).is_err());
    let packet = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(packet.message_type, MessageType::Defused);
    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
}

#[test]
fn test_codec_reports_truncated_tail() {
    let mut codec = FrameCodec::new();
    let frame = packet(MessageType::Strike, 1, vec![]).encode().unwrap();
    let mut buf = BytesMut::from(&frame[..5]);

    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(Error::Protocol(ProtocolError::ShortRead { expected: 9, got: 5 }))
    ));
    assert!(buf.is_empty());
}
