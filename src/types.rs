//! Core types used throughout the bus node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 16-bit bus address of a module or the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u16);

impl Address {
    /// Well-known address of the controller/timer module.
    pub const CONTROLLER: Self = Self(0x0000);

    /// Default address of a peripheral module.
    pub const DEFAULT_MODULE: Self = Self(0x0010);

    pub fn new(addr: u16) -> Self {
        Self(addr)
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for Address {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl FromStr for Address {
    type Err = std::num::ParseIntError;

    /// Accepts decimal or `0x`-prefixed hexadecimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };
        Ok(Self(value))
    }
}

/// 8-bit frame sequence number, wraps modulo 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(pub u8);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);

    pub fn new(n: u8) -> Self {
        Self(n)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Forward distance from `other` to `self`, modulo 256.
    pub fn distance(self, other: Self) -> u8 {
        self.0.wrapping_sub(other.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse game state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    /// Powered, not yet configured by the controller.
    #[default]
    Sleep = 0,
    /// Configured, waiting for the round to start.
    Ready = 1,
    /// Round running, module live.
    Armed = 2,
    /// Module solved. Terminal.
    Disarmed = 3,
}

impl Mode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Sleep),
            1 => Some(Self::Ready),
            2 => Some(Self::Armed),
            3 => Some(Self::Disarmed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disarmed)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep => write!(f, "SLEEP"),
            Self::Ready => write!(f, "READY"),
            Self::Armed => write!(f, "ARMED"),
            Self::Disarmed => write!(f, "DISARMED"),
        }
    }
}

/// Per-node traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Frames written to the line, including ACKs and retransmissions.
    pub frames_sent: u64,
    /// Valid frames addressed to this node.
    pub frames_received: u64,
    /// Retransmissions of an unacknowledged packet.
    pub retransmissions: u64,
    /// ACKs sent in reply to inbound frames.
    pub acks_sent: u64,
    /// ACKs that cleared the in-flight packet.
    pub acks_received: u64,
    /// Frames discarded for a bad checksum.
    pub checksum_errors: u64,
    /// Frames whose length byte is below the header size.
    pub malformed_frames: u64,
    /// Frames cut short by the read timeout.
    pub short_reads: u64,
    /// Valid frames addressed to another node.
    pub foreign_frames: u64,
    /// Repeated copies of an already dispatched frame.
    pub duplicates: u64,
    /// Send attempts abandoned because the line stayed busy.
    pub busy_backoffs: u64,
    /// Packets acknowledged by their destination.
    pub delivered: u64,
    /// Packets dropped after exhausting their attempts.
    pub delivery_failures: u64,
}

impl NodeStats {
    /// Fraction of sent frames that were retransmissions.
    pub fn retransmission_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.frames_sent as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_wraps() {
        assert_eq!(SequenceNumber(254).next(), SequenceNumber(255));
        assert_eq!(SequenceNumber(255).next(), SequenceNumber(0));
        assert_eq!(SequenceNumber(1).distance(SequenceNumber(255)), 2);
    }

    #[test]
    fn test_address_parse_and_display() {
        assert_eq!("0x10".parse::<Address>().unwrap(), Address(0x10));
        assert_eq!("16".parse::<Address>().unwrap(), Address(0x10));
        assert!("0xzz".parse::<Address>().is_err());
        assert_eq!(Address::CONTROLLER.to_string(), "0x0000");
        assert_eq!(Address(0x1234).to_le_bytes(), [0x34, 0x12]);
    }

    #[test]
    fn test_mode_codes() {
        for mode in [Mode::Sleep, Mode::Ready, Mode::Armed, Mode::Disarmed] {
            assert_eq!(Mode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(Mode::from_u8(4), None);
        assert!(Mode::Disarmed.is_terminal());
        assert!(!Mode::Armed.is_terminal());
    }
}
