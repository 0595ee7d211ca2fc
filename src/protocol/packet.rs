//! Packet structure and handling.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::types::{Address, SequenceNumber};

use super::{
    frame_size, verify_checksum, MessageType, Sound, CHECKSUM_SIZE, HEADER_SIZE,
    LENGTH_FIELD_SIZE, MAX_PAYLOAD_SIZE,
};

/// One unit of exchange on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Sender bus address.
    pub source: Address,
    /// Receiver bus address.
    pub dest: Address,
    /// Message kind.
    pub message_type: MessageType,
    /// Sequence number.
    pub seq: SequenceNumber,
    /// Kind-dependent payload.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a new packet.
    pub fn new(
        source: Address,
        dest: Address,
        message_type: MessageType,
        seq: SequenceNumber,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }

        Ok(Self {
            source,
            dest,
            message_type,
            seq,
            payload,
        })
    }

    /// Create an ACK for the frame `seq` received from `dest`.
    pub fn ack(source: Address, dest: Address, seq: SequenceNumber) -> Self {
        Self {
            source,
            dest,
            message_type: MessageType::Ack,
            seq,
            payload: Vec::new(),
        }
    }

    /// Value of the length field: everything between it and the checksum.
    pub fn length(&self) -> u8 {
        (HEADER_SIZE + self.payload.len()) as u8
    }

    /// Get total encoded size.
    pub fn size(&self) -> usize {
        frame_size(self.length())
    }

    /// Interpret the payload as a sound cue.
    pub fn sound(&self) -> Option<Sound> {
        if self.message_type != MessageType::Sound {
            return None;
        }
        self.payload.first().and_then(|&code| Sound::from_code(code).ok())
    }

    /// Encode packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }

        let mut buf = vec![0u8; self.size()];
        buf[0] = self.length();
        LittleEndian::write_u16(&mut buf[1..3], self.source.0);
        LittleEndian::write_u16(&mut buf[3..5], self.dest.0);
        buf[5] = self.message_type as u8;
        buf[6] = self.seq.0;

        let payload_end = LENGTH_FIELD_SIZE + HEADER_SIZE + self.payload.len();
        buf[7..payload_end].copy_from_slice(&self.payload);

        let checksum = super::checksum(&buf[..payload_end]);
        LittleEndian::write_u16(&mut buf[payload_end..], checksum);
        Ok(buf)
    }

    /// Decode exactly one frame from bytes.
    ///
    /// The checksum is verified before any field is interpreted, so a corrupted
    /// frame never yields a packet.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let Some(&length) = buf.first() else {
            return Err(ProtocolError::ShortRead {
                expected: LENGTH_FIELD_SIZE,
                got: 0,
            }
            .into());
        };

        if (length as usize) < HEADER_SIZE {
            return Err(ProtocolError::LengthTooSmall {
                length,
                min: HEADER_SIZE,
            }
            .into());
        }

        let expected = frame_size(length);
        if buf.len() < expected {
            return Err(ProtocolError::ShortRead {
                expected,
                got: buf.len(),
            }
            .into());
        }
        if buf.len() > expected {
            return Err(ProtocolError::LengthMismatch {
                declared: expected,
                actual: buf.len(),
            }
            .into());
        }

        let (valid, sum) = verify_checksum(buf);
        if !valid {
            return Err(ProtocolError::ChecksumMismatch { sum }.into());
        }

        let source = Address(LittleEndian::read_u16(&buf[1..3]));
        let dest = Address(LittleEndian::read_u16(&buf[3..5]));
        let message_type = MessageType::try_from(buf[5])?;
        let seq = SequenceNumber(buf[6]);
        let payload = buf[7..expected - CHECKSUM_SIZE].to_vec();

        Ok(Self {
            source,
            dest,
            message_type,
            seq,
            payload,
        })
    }
}
