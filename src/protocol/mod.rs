//! Wire protocol for the shared bus.
//!
//! Defines the frame format, message kinds, and serialization.
//!
//! ## Frame Format
//!
//! All multi-byte fields are little-endian.
//!
//! ```text
//! ┌────────────┬────────────┬──────────┬──────────┬─────────┬─────────────┬──────────────┐
//! │ Length (1) │ Source (2) │ Dest (2) │ Type (1) │ Seq (1) │ Payload ... │ Checksum (2) │
//! └────────────┴────────────┴──────────┴──────────┴─────────┴─────────────┴──────────────┘
//! ```
//!
//! `Length` counts source through payload (`6 + payload.len()`). The checksum is
//! chosen so that the byte sum of everything before it plus the 16-bit checksum
//! value equals `0xFFFF` modulo 65536.

mod codec;
mod message;
mod packet;

pub use codec::{decode_packet, encode_packet, FrameCodec};
pub use message::{MessageType, ModuleFlags, Sound};
pub use packet::Packet;

/// Size of the length prefix.
pub const LENGTH_FIELD_SIZE: usize = 1;

/// Bytes counted by the length field besides the payload: source, dest, type, seq.
pub const HEADER_SIZE: usize = 2 + 2 + 1 + 1;

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - HEADER_SIZE;

/// Smallest complete frame (empty payload).
pub const MIN_FRAME_SIZE: usize = LENGTH_FIELD_SIZE + HEADER_SIZE + CHECKSUM_SIZE;

/// Largest complete frame.
pub const MAX_FRAME_SIZE: usize = MIN_FRAME_SIZE + MAX_PAYLOAD_SIZE;

/// Sum of `data` as unsigned bytes, modulo 65536.
pub fn byte_sum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Checksum closing `data` so that `byte_sum(data) + checksum == 0xFFFF`.
pub fn checksum(data: &[u8]) -> u16 {
    0xFFFFu16.wrapping_sub(byte_sum(data))
}

/// Verify a complete frame: the body byte sum plus the trailing checksum must be `0xFFFF`.
///
/// Returns the computed total so callers can report it.
pub fn verify_checksum(frame: &[u8]) -> (bool, u16) {
    if frame.len() < CHECKSUM_SIZE {
        return (false, byte_sum(frame));
    }
    let (body, tail) = frame.split_at(frame.len() - CHECKSUM_SIZE);
    let transmitted = u16::from_le_bytes([tail[0], tail[1]]);
    let total = byte_sum(body).wrapping_add(transmitted);
    (total == 0xFFFF, total)
}

/// Total frame size for a frame whose length byte is `length`.
pub fn frame_size(length: u8) -> usize {
    LENGTH_FIELD_SIZE + length as usize + CHECKSUM_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_closes_sum() {
        let body = [6u8, 0x10, 0x00, 0x00, 0x00, 6, 3];
        let cs = checksum(&body);
        assert_eq!(byte_sum(&body).wrapping_add(cs), 0xFFFF);

        let mut frame = body.to_vec();
        frame.extend_from_slice(&cs.to_le_bytes());
        assert_eq!(verify_checksum(&frame), (true, 0xFFFF));
    }

    #[test]
    fn test_checksum_wraps_on_large_sums() {
        let body = vec![0xFFu8; MAX_FRAME_SIZE - CHECKSUM_SIZE];
        let cs = checksum(&body);
        assert_eq!(byte_sum(&body).wrapping_add(cs), 0xFFFF);
    }

    #[test]
    fn test_frame_bounds() {
        assert_eq!(MIN_FRAME_SIZE, 9);
        assert_eq!(MAX_PAYLOAD_SIZE, 249);
        assert_eq!(MAX_FRAME_SIZE, 258);
        assert_eq!(frame_size(6), 9);
    }
}
