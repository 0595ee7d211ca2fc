//! Frame encoding and decoding.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{frame_size, Packet, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};

/// Encode a packet to bytes.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    packet.encode()
}

/// Decode a packet from bytes.
pub fn decode_packet(data: &[u8]) -> Result<Packet> {
    Packet::decode(data)
}

/// Splits a byte stream of back-to-back frames.
///
/// On a bad frame the decoder consumes the offending bytes before returning the
/// error, so a caller may keep decoding after it: a frame with a bad checksum is
/// skipped whole, a length byte below the header size is skipped alone.
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom frame size limit.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = crate::Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let Some(&length) = src.first() else {
            return Ok(None);
        };

        if (length as usize) < HEADER_SIZE {
            src.advance(1);
            return Err(ProtocolError::LengthTooSmall {
                length,
                min: HEADER_SIZE,
            }
            .into());
        }

        let total_len = frame_size(length);
        if total_len > self.max_frame_size {
            src.advance(1);
            return Err(ProtocolError::PayloadTooLarge {
                size: total_len,
                max: self.max_frame_size,
            }
            .into());
        }

        // Wait for complete frame
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_len);
        Packet::decode(&frame).map(Some)
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                let got = src.len();
                let expected = frame_size(src[0]);
                src.clear();
                Err(ProtocolError::ShortRead { expected, got }.into())
            }
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        if item.size() > self.max_frame_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: item.size(),
                max: self.max_frame_size,
            }
            .into());
        }

        let encoded = item.encode()?;
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);

        Ok(())
    }
}
