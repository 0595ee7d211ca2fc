//! Error types for the bus node.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::MessageType;
use crate::types::{Address, Mode, SequenceNumber};

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Delivery errors
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Frame parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("checksum mismatch: frame sums to {sum:#06x}, expected 0xffff")]
    ChecksumMismatch { sum: u16 },

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("length field {length} is below the {min}-byte header")]
    LengthTooSmall { length: u8, min: usize },

    #[error("length field says {declared} bytes but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid sound cue: {0}")]
    InvalidSound(u8),

    #[error("sound cue has no wire code: {0}")]
    UnknownSound(String),
}

/// Bus transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bus busy after {polls} observations")]
    BusBusy { polls: u32 },

    #[error("line did not go quiet within {0:?}")]
    ActivityTimeout(Duration),
}

/// Delivery manager and session errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("send queue full ({depth} packets pending)")]
    QueueFull { depth: usize },

    #[error("{kind} to {dest} seq {seq} not acknowledged after {attempts} attempts")]
    DeliveryFailed {
        dest: Address,
        kind: MessageType,
        seq: SequenceNumber,
        attempts: u32,
    },

    #[error("session is {mode}, {action} rejected")]
    TerminalMode { mode: Mode, action: &'static str },
}

impl Error {
    /// Check if the control loop should absorb this error and keep ticking.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Protocol(
                ProtocolError::ChecksumMismatch { .. }
                    | ProtocolError::ShortRead { .. }
                    | ProtocolError::LengthTooSmall { .. }
                    | ProtocolError::LengthMismatch { .. }
                    | ProtocolError::InvalidMessageType(_)
            ) | Error::Transport(
                TransportError::BusBusy { .. }
                    | TransportError::ActivityTimeout(_)
            ) | Error::Io(_)
        )
    }

    /// Check if the error means a frame arrived damaged and was discarded.
    pub fn is_corrupt_frame(&self) -> bool {
        matches!(
            self,
            Error::Protocol(
                ProtocolError::ChecksumMismatch { .. }
                    | ProtocolError::LengthTooSmall { .. }
                    | ProtocolError::LengthMismatch { .. }
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let checksum: Error = ProtocolError::ChecksumMismatch { sum: 0x1234 }.into();
        assert!(checksum.is_recoverable());
        assert!(checksum.is_corrupt_frame());

        let busy: Error = TransportError::BusBusy { polls: 64 }.into();
        assert!(busy.is_recoverable());
        assert!(!busy.is_corrupt_frame());

        let full: Error = DeliveryError::QueueFull { depth: 4 }.into();
        assert!(!full.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err: Error = DeliveryError::DeliveryFailed {
            dest: Address::CONTROLLER,
            kind: MessageType::Strike,
            seq: SequenceNumber(7),
            attempts: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "delivery error: STRIKE to 0x0000 seq 7 not acknowledged after 3 attempts"
        );

        let terminal = DeliveryError::TerminalMode {
            mode: Mode::Disarmed,
            action: "strike",
        };
        assert_eq!(terminal.to_string(), "session is DISARMED, strike rejected");
    }
}
