//! Outbound commands and their wire encoding
//!
//! The rig understands single-token lines: `1`..`9` set the speed level,
//! `-` stops the motor, `START` begins an automatic test profile.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::codec::Encoder;

/// Throttle level accepted by the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeedLevel(u8);

impl SpeedLevel {
    /// Lowest level
    pub const MIN: u8 = 1;
    /// Highest level
    pub const MAX: u8 = 9;

    /// Validate a level
    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&level).then_some(Self(level))
    }

    /// Numeric value
    pub fn get(self) -> u8 {
        self.0
    }
}

/// A command for the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Set throttle level
    SetSpeed(SpeedLevel),
    /// Stop the motor
    Stop,
    /// Begin the automatic test profile
    Start,
}

impl Command {
    /// Token written on the wire, without the line terminator
    pub fn token(&self) -> String {
        match self {
            Command::SetSpeed(level) => level.get().to_string(),
            Command::Stop => "-".to_string(),
            Command::Start => "START".to_string(),
        }
    }

    /// Whether the operator loop ends after this command
    pub fn ends_input(&self) -> bool {
        matches!(self, Command::Stop)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetSpeed(level) => write!(f, "speed {}", level.get()),
            Command::Stop => write!(f, "stop"),
            Command::Start => write!(f, "start"),
        }
    }
}

/// Operator input that is not a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid command {0:?}: use 1-9 to set speed, '-' to stop")]
pub struct InvalidIntent(pub String);

impl FromStr for Command {
    type Err = InvalidIntent;

    /// Parse an operator token. Only `1`..`9` and `-` are accepted;
    /// `START` is never typed by the operator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim_end_matches(['\r', '\n']);
        match token.as_bytes() {
            [b'-'] => Ok(Command::Stop),
            [digit @ b'1'..=b'9'] => SpeedLevel::new(digit - b'0')
                .map(Command::SetSpeed)
                .ok_or_else(|| InvalidIntent(token.to_string())),
            _ => Err(InvalidIntent(token.to_string())),
        }
    }
}

/// Line encoder for [`Command`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCodec;

impl Encoder<Command> for CommandCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let token = item.token();
        dst.reserve(token.len() + 1);
        dst.put_slice(token.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
