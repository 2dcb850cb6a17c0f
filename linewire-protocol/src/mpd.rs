//! MPD response grammar.
//!
//! A response is any number of data lines followed by `OK` or an
//! `ACK [code@offset] {command} message` line. The very first line a
//! server sends is a greeting starting with [`GREETING`].

use crate::codec::ResponseDecoder;
use crate::error::{AckCode, ProtocolError};
use crate::line;
use bytes::BytesMut;
use serde::Serialize;
use std::fmt;

/// Prefix of the first line sent by every MPD server.
pub const GREETING: &str = "OK MPD ";

/// Event categories reported by `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Subsystem {
    Database = 0,
    Update = 1,
    StoredPlaylist = 2,
    Playlist = 3,
    Player = 4,
    Mixer = 5,
    Output = 6,
    Options = 7,
    Sticker = 8,
    Subscription = 9,
    Message = 10,
    Partition = 11,
    Neighbor = 12,
    Mount = 13,
}

impl Subsystem {
    /// Every subsystem, ordered by bit.
    pub const ALL: [Subsystem; 14] = [
        Subsystem::Database,
        Subsystem::Update,
        Subsystem::StoredPlaylist,
        Subsystem::Playlist,
        Subsystem::Player,
        Subsystem::Mixer,
        Subsystem::Output,
        Subsystem::Options,
        Subsystem::Sticker,
        Subsystem::Subscription,
        Subsystem::Message,
        Subsystem::Partition,
        Subsystem::Neighbor,
        Subsystem::Mount,
    ];

    /// Wire name as used by `idle` and in `changed:` lines.
    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Database => "database",
            Subsystem::Update => "update",
            Subsystem::StoredPlaylist => "stored_playlist",
            Subsystem::Playlist => "playlist",
            Subsystem::Player => "player",
            Subsystem::Mixer => "mixer",
            Subsystem::Output => "output",
            Subsystem::Options => "options",
            Subsystem::Sticker => "sticker",
            Subsystem::Subscription => "subscription",
            Subsystem::Message => "message",
            Subsystem::Partition => "partition",
            Subsystem::Neighbor => "neighbor",
            Subsystem::Mount => "mount",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of subsystems, one bit each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SubsystemMask(u32);

impl SubsystemMask {
    /// Empty set. Idling on it means "all subsystems".
    pub const NONE: SubsystemMask = SubsystemMask(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with(mut self, subsystem: Subsystem) -> Self {
        self.insert(subsystem);
        self
    }

    pub fn insert(&mut self, subsystem: Subsystem) {
        self.0 |= subsystem.bit();
    }

    pub fn contains(&self, subsystem: Subsystem) -> bool {
        self.0 & subsystem.bit() != 0
    }

    pub fn intersects(&self, other: SubsystemMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Known subsystems in the set, ordered by bit. Unknown bits are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Subsystem> + '_ {
        Subsystem::ALL.iter().copied().filter(|s| self.contains(*s))
    }

    /// Wire names of the subsystems in the set.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|s| s.name()).collect()
    }
}

impl From<Subsystem> for SubsystemMask {
    fn from(subsystem: Subsystem) -> Self {
        Self(subsystem.bit())
    }
}

impl FromIterator<Subsystem> for SubsystemMask {
    fn from_iter<I: IntoIterator<Item = Subsystem>>(iter: I) -> Self {
        let mut mask = Self::NONE;
        for subsystem in iter {
            mask.insert(subsystem);
        }
        mask
    }
}

impl std::ops::BitOr for SubsystemMask {
    type Output = SubsystemMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SubsystemMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// Failure details carried by an `ACK` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub code: u32,
    /// Zero-based index of the failing command within a batch.
    pub list_offset: u32,
    pub command: String,
    pub message: String,
}

impl Ack {
    /// Known error kind, if the code is one MPD documents.
    pub fn kind(&self) -> Option<AckCode> {
        AckCode::from_code(self.code)
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] {{{}}} {}",
            self.code, self.list_offset, self.command, self.message
        )
    }
}

fn take_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let n = s[..end].parse().ok()?;
    Some((n, &s[end..]))
}

/// Parses `ACK [code@offset] {command} message`.
pub fn parse_ack(line: &str) -> Option<Ack> {
    let rest = line.strip_prefix("ACK [")?;
    let (code, rest) = take_number(rest)?;
    let rest = rest.strip_prefix('@')?;
    let (list_offset, rest) = take_number(rest)?;
    let rest = rest.strip_prefix("] {")?;
    let end = rest.find('}')?;
    let command = &rest[..end];
    let message = rest[end + 1..].strip_prefix(' ')?;

    Some(Ack {
        code,
        list_offset,
        command: command.to_string(),
        message: message.to_string(),
    })
}

/// Splits a `key: value` data line at the first `": "`.
pub fn parse_kv(line: &str) -> Option<(&str, &str)> {
    line.split_once(": ")
}

/// Classification of one line received after the greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Ok,
    ListOk,
    Ack(Ack),
    Data,
}

impl Line {
    pub fn classify(line: &str) -> Line {
        match line {
            "OK" => Line::Ok,
            "list_OK" => Line::ListOk,
            _ => parse_ack(line).map_or(Line::Data, Line::Ack),
        }
    }
}

/// A complete MPD response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Set when the response ended with `ACK`.
    pub error: Option<Ack>,
    /// Data lines preceding the terminator, in order.
    pub data: Vec<String>,
}

impl Response {
    pub fn ok(data: Vec<String>) -> Self {
        Self { error: None, data }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Iterates over data lines that have `key: value` form.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().filter_map(|l| parse_kv(l))
    }

    /// Value of `key`, compared case-insensitively. The last one wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
            .last()
    }

    /// Collects the `changed:` lines of an idle response.
    ///
    /// Returns the resulting mask along with lines that were not
    /// understood.
    pub fn changed(&self) -> (SubsystemMask, Vec<&str>) {
        let mut mask = SubsystemMask::NONE;
        let mut unknown = Vec::new();
        for line in &self.data {
            match parse_kv(line) {
                Some((key, value)) if key.eq_ignore_ascii_case("changed") => {
                    match Subsystem::from_name(value) {
                        Some(subsystem) => mask.insert(subsystem),
                        None => unknown.push(line.as_str()),
                    }
                }
                _ => unknown.push(line.as_str()),
            }
        }
        (mask, unknown)
    }
}

/// Incremental decoder for the MPD response stream.
#[derive(Debug, Default)]
pub struct Decoder {
    greeted: bool,
    server_version: Option<String>,
    data: Vec<String>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a valid greeting has been received.
    pub fn is_greeted(&self) -> bool {
        self.greeted
    }

    /// Version announced in the greeting.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    fn finish(&mut self, error: Option<Ack>) -> Response {
        Response {
            error,
            data: std::mem::take(&mut self.data),
        }
    }
}

impl ResponseDecoder for Decoder {
    type Response = Response;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        while let Some(raw) = line::next_line(buf) {
            let text = line::to_text(&raw);

            if !self.greeted {
                let version = text
                    .strip_prefix(GREETING)
                    .ok_or_else(|| ProtocolError::InvalidGreeting(text.clone()))?;
                self.server_version = Some(version.to_string());
                self.greeted = true;
                continue;
            }

            match Line::classify(&text) {
                Line::Ok => return Ok(Some(self.finish(None))),
                Line::Ack(ack) => return Ok(Some(self.finish(Some(ack)))),
                Line::ListOk => return Err(ProtocolError::ListOkUnsupported),
                Line::Data => self.data.push(text),
            }
        }
        Ok(None)
    }

    fn clear(&mut self) {
        self.greeted = false;
        self.server_version = None;
        self.data.clear();
    }
}
