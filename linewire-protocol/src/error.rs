//! Protocol error types and MPD ACK error codes.

use std::fmt;
use thiserror::Error;

/// Framing errors. Every one of these is fatal to the connection that
/// produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid greeting: {0:?}")]
    InvalidGreeting(String),

    #[error("unexpected quote inside an unquoted token")]
    UnexpectedQuote,

    #[error("unterminated quoted token")]
    UnterminatedQuote,

    #[error("unexpected character {0:#04x} after closing quote")]
    TrailingAfterQuote(u8),

    #[error("list_OK responses are not supported")]
    ListOkUnsupported,

    #[error("ERR response without an error identifier")]
    MissingErrorId,
}

/// Numeric error codes carried by MPD `ACK` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckCode {
    NotList,
    Arg,
    Password,
    Permission,
    Unknown,
    NoExist,
    PlaylistMax,
    System,
    PlaylistLoad,
    UpdateAlready,
    PlayerSync,
    Exist,
}

impl AckCode {
    /// Maps a wire code to a known variant.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => AckCode::NotList,
            2 => AckCode::Arg,
            3 => AckCode::Password,
            4 => AckCode::Permission,
            5 => AckCode::Unknown,
            50 => AckCode::NoExist,
            51 => AckCode::PlaylistMax,
            52 => AckCode::System,
            53 => AckCode::PlaylistLoad,
            54 => AckCode::UpdateAlready,
            55 => AckCode::PlayerSync,
            56 => AckCode::Exist,
            _ => return None,
        })
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckCode::NotList => write!(f, "NOT_LIST"),
            AckCode::Arg => write!(f, "ARG"),
            AckCode::Password => write!(f, "PASSWORD"),
            AckCode::Permission => write!(f, "PERMISSION"),
            AckCode::Unknown => write!(f, "UNKNOWN"),
            AckCode::NoExist => write!(f, "NO_EXIST"),
            AckCode::PlaylistMax => write!(f, "PLAYLIST_MAX"),
            AckCode::System => write!(f, "SYSTEM"),
            AckCode::PlaylistLoad => write!(f, "PLAYLIST_LOAD"),
            AckCode::UpdateAlready => write!(f, "UPDATE_ALREADY"),
            AckCode::PlayerSync => write!(f, "PLAYER_SYNC"),
            AckCode::Exist => write!(f, "EXIST"),
        }
    }
}
