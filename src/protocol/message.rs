//! Message kinds and typed payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Message kind carried in the frame's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageType {
    /// Controller asks modules to identify.
    RequestId = 0,
    /// Module identity reply.
    ResponseId = 1,
    /// Acknowledges the frame with the same sequence number.
    Ack = 2,
    /// Round stopped.
    Stop = 3,
    /// Controller configures a module for the next round.
    Configure = 4,
    /// Round started.
    Start = 5,
    /// Module reports a mistake.
    Strike = 6,
    /// Module could not arm.
    Error = 7,
    /// Module solved.
    Defused = 8,
    /// Needy module event.
    Needy = 9,
    /// Status request.
    ReadStatus = 10,
    /// Status reply.
    Status = 11,
    /// Sound cue request.
    Sound = 12,
}

impl MessageType {
    pub const ALL: [Self; 13] = [
        Self::RequestId,
        Self::ResponseId,
        Self::Ack,
        Self::Stop,
        Self::Configure,
        Self::Start,
        Self::Strike,
        Self::Error,
        Self::Defused,
        Self::Needy,
        Self::ReadStatus,
        Self::Status,
        Self::Sound,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::RequestId),
            1 => Some(Self::ResponseId),
            2 => Some(Self::Ack),
            3 => Some(Self::Stop),
            4 => Some(Self::Configure),
            5 => Some(Self::Start),
            6 => Some(Self::Strike),
            7 => Some(Self::Error),
            8 => Some(Self::Defused),
            9 => Some(Self::Needy),
            10 => Some(Self::ReadStatus),
            11 => Some(Self::Status),
            12 => Some(Self::Sound),
            _ => None,
        }
    }

    /// Game events the controller must never miss.
    pub fn is_game_critical(self) -> bool {
        matches!(self, Self::Strike | Self::Defused | Self::Error)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RequestId => "REQUEST_ID",
            Self::ResponseId => "RESPONSE_ID",
            Self::Ack => "ACK",
            Self::Stop => "STOP",
            Self::Configure => "CONFIGURE",
            Self::Start => "START",
            Self::Strike => "STRIKE",
            Self::Error => "ERROR",
            Self::Defused => "DEFUSED",
            Self::Needy => "NEEDY",
            Self::ReadStatus => "READ_STATUS",
            Self::Status => "STATUS",
            Self::Sound => "SOUND",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, ProtocolError> {
        Self::from_u8(v).ok_or(ProtocolError::InvalidMessageType(v))
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    /// Parse a kind by name (`strike`, `READ_STATUS`, `read-status`) or wire code.
    fn from_str(s: &str) -> Result<Self, ProtocolError> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::try_from(code);
        }
        let name = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or(ProtocolError::UnknownMessageType(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability flags a module advertises to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFlags(u8);

impl ModuleFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Module can trigger a strike.
    pub const TRIGGER: u8 = 0x01;

    /// Module is a needy module.
    pub const NEEDY: u8 = 0x02;

    /// Module must be the only one of its kind on the bus.
    pub const EXCLUSIVE: u8 = 0x04;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Serialize for ModuleFlags {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for ModuleFlags {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(u8::deserialize(deserializer)?))
    }
}

/// Sound cue carried as the one-byte payload of a `SOUND` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    Halt,
    /// Simon Says tone, 1 through 4.
    Simon(u8),
    TimerLow,
    /// Button press/release click, 1 or 2.
    Button(u8),
    TuneUp,
    TuneDown,
    Vent,
    /// Capacitor start-up stage, 1 through 4.
    StartCap(u8),
    /// Morse code letter, `'A'` through `'Z'`.
    Morse(char),
}

impl Sound {
    const SIMON_BASE: u8 = 1;
    const TIMER_LOW: u8 = 5;
    const BUTTON_BASE: u8 = 6;
    const TUNE_UP: u8 = 8;
    const TUNE_DOWN: u8 = 9;
    const VENT: u8 = 10;
    const START_CAP_BASE: u8 = 11;
    const MORSE_A: u8 = 15;
    const MORSE_Z: u8 = 40;

    /// Wire code of this cue, `None` if the variant's argument is out of range.
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Halt => Some(0),
            Self::Simon(n @ 1..=4) => Some(Self::SIMON_BASE + n - 1),
            Self::TimerLow => Some(Self::TIMER_LOW),
            Self::Button(n @ 1..=2) => Some(Self::BUTTON_BASE + n - 1),
            Self::TuneUp => Some(Self::TUNE_UP),
            Self::TuneDown => Some(Self::TUNE_DOWN),
            Self::Vent => Some(Self::VENT),
            Self::StartCap(n @ 1..=4) => Some(Self::START_CAP_BASE + n - 1),
            Self::Morse(c) if c.is_ascii_alphabetic() => {
                Some(Self::MORSE_A + (c.to_ascii_uppercase() as u8 - b'A'))
            }
            _ => None,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        let sound = match code {
            0 => Self::Halt,
            1..=4 => Self::Simon(code - Self::SIMON_BASE + 1),
            Self::TIMER_LOW => Self::TimerLow,
            6..=7 => Self::Button(code - Self::BUTTON_BASE + 1),
            Self::TUNE_UP => Self::TuneUp,
            Self::TUNE_DOWN => Self::TuneDown,
            Self::VENT => Self::Vent,
            11..=14 => Self::StartCap(code - Self::START_CAP_BASE + 1),
            Self::MORSE_A..=Self::MORSE_Z => Self::Morse(char::from(b'A' + (code - Self::MORSE_A))),
            _ => return Err(ProtocolError::InvalidSound(code)),
        };
        Ok(sound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        for (code, kind) in MessageType::ALL.iter().enumerate() {
            assert_eq!(*kind as u8, code as u8);
            assert_eq!(MessageType::from_u8(code as u8), Some(*kind));
        }
        assert_eq!(MessageType::from_u8(13), None);
        assert_eq!(
            MessageType::try_from(200),
            Err(ProtocolError::InvalidMessageType(200))
        );
    }

    #[test]
    fn test_message_type_from_str() {
        assert_eq!("strike".parse::<MessageType>(), Ok(MessageType::Strike));
        assert_eq!("read-status".parse::<MessageType>(), Ok(MessageType::ReadStatus));
        assert_eq!("12".parse::<MessageType>(), Ok(MessageType::Sound));
        assert!("boom".parse::<MessageType>().is_err());
        assert!("13".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_game_critical_kinds() {
        let critical: Vec<_> = MessageType::ALL
            .iter()
            .filter(|k| k.is_game_critical())
            .collect();
        assert_eq!(
            critical,
            vec![&MessageType::Strike, &MessageType::Error, &MessageType::Defused]
        );
    }

    #[test]
    fn test_module_flags() {
        let mut flags = ModuleFlags::NONE;
        flags.set(ModuleFlags::TRIGGER);
        flags.set(ModuleFlags::EXCLUSIVE);
        assert!(flags.has(ModuleFlags::TRIGGER));
        assert!(!flags.has(ModuleFlags::NEEDY));
        assert_eq!(flags.bits(), 0x05);
        flags.clear(ModuleFlags::TRIGGER);
        assert_eq!(flags.bits(), 0x04);
    }

    #[test]
    fn test_sound_table() {
        assert_eq!(Sound::Halt.code(), Some(0));
        assert_eq!(Sound::Simon(4).code(), Some(4));
        assert_eq!(Sound::Button(2).code(), Some(7));
        assert_eq!(Sound::StartCap(1).code(), Some(11));
        assert_eq!(Sound::Morse('a').code(), Some(15));
        assert_eq!(Sound::Morse('Z').code(), Some(40));
        assert_eq!(Sound::Simon(5).code(), None);
        assert_eq!(Sound::Morse('1').code(), None);

        for code in 0..=40u8 {
            let sound = Sound::from_code(code).unwrap();
            assert_eq!(sound.code(), Some(code));
        }
        assert_eq!(Sound::from_code(41), Err(ProtocolError::InvalidSound(41)));
    }
}
