//! Wire protocol definitions for the three room transports: the JSON lobby
//! channel, the big-endian TCP control channel, and the big-endian UDP
//! input-relay channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod counter;
pub mod lobby;
pub mod tcp;
pub mod udp;

pub use lobby::{LobbyReply, LobbyRequest};

/// Protocol revision the lobby requires from connecting clients.
pub const NETPLAY_VERSION: &str = "MPN-4";

/// Seats (and gameplay slots) per room.
pub const MAX_PLAYERS: usize = 4;

/// Maximum retained input frames per slot before the oldest is evicted.
pub const INPUT_DATA_MAX: usize = 5000;

#[derive(Debug, Error)]
#[error("invalid accept code {0}")]
pub struct InvalidAcceptCode(u8);

/// Result code carried in every lobby reply. Serialized as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Accept {
    Accepted,
    BadPassword,
    MismatchVersion,
    RoomFull,
    DuplicateName,
    RoomDeleted,
    BadName,
    BadEmulator,
    BadAuth,
    Other,
}

impl From<Accept> for u8 {
    fn from(code: Accept) -> Self {
        match code {
            Accept::Accepted => 0,
            Accept::BadPassword => 1,
            Accept::MismatchVersion => 2,
            Accept::RoomFull => 3,
            Accept::DuplicateName => 4,
            Accept::RoomDeleted => 5,
            Accept::BadName => 6,
            Accept::BadEmulator => 7,
            Accept::BadAuth => 8,
            Accept::Other => 9,
        }
    }
}

impl TryFrom<u8> for Accept {
    type Error = InvalidAcceptCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::BadPassword),
            2 => Ok(Self::MismatchVersion),
            3 => Ok(Self::RoomFull),
            4 => Ok(Self::DuplicateName),
            5 => Ok(Self::RoomDeleted),
            6 => Ok(Self::BadName),
            7 => Ok(Self::BadEmulator),
            8 => Ok(Self::BadAuth),
            9 => Ok(Self::Other),
            other => Err(InvalidAcceptCode(other)),
        }
    }
}

/// Error raised while decoding a TCP or UDP frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("player slot {0} out of range")]
    SlotOutOfRange(u8),
    #[error("length {len} inconsistent with message type {kind}")]
    BadLength { kind: u8, len: usize },
}
