//! # linewire-protocol
//!
//! Wire grammar for the two line-oriented protocols spoken by linewire:
//! the MPD control protocol and the NUT (Network UPS Tools) protocol.
//!
//! This crate provides:
//! - Argument quoting and serialization, one rule set per protocol
//! - A byte-at-a-time tokenizer shared by both grammars
//! - Newline splitting over growable byte buffers
//! - MPD and NUT response decoders that turn raw input into responses
//! - The MPD idle subsystem table and ACK error codes

pub mod codec;
pub mod error;
pub mod line;
pub mod mpd;
pub mod nut;

pub use codec::{Grammar, ResponseDecoder, Tokenizer, MPD_GRAMMAR, NUT_GRAMMAR};
pub use error::{AckCode, ProtocolError};

/// Default TCP port of an MPD server.
pub const DEFAULT_MPD_PORT: u16 = 6600;

/// Default TCP port of a NUT server (upsd).
pub const DEFAULT_NUT_PORT: u16 = 3493;
