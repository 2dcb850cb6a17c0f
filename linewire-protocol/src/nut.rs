//! NUT response grammar.
//!
//! Every line is a sequence of optionally quoted fields. Multi-line
//! answers are wrapped in `BEGIN LIST` / `END LIST`; the markers are
//! consumed here and only the lines between them reach the caller.

use crate::codec::{ResponseDecoder, Tokenizer, NUT_GRAMMAR};
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use serde::Serialize;

/// A complete NUT response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Error identifier from an `ERR` line.
    pub error: Option<String>,
    /// Records in arrival order, each a list of fields.
    pub data: Vec<Vec<String>>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Records whose first field equals `kind`, with that field stripped.
    pub fn records<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.data
            .iter()
            .filter(move |r| r.first().map(String::as_str) == Some(kind))
            .map(|r| &r[1..])
    }

    /// UPS names from a `LIST UPS` answer (`UPS <name> <description>`).
    pub fn ups_names(&self) -> Vec<&str> {
        self.records("UPS")
            .filter_map(|r| r.first().map(String::as_str))
            .collect()
    }

    /// Variables from a `LIST VAR` answer (`VAR <ups> <name> <value>`).
    pub fn vars(&self) -> Vec<(&str, &str)> {
        self.records("VAR")
            .filter(|r| r.len() >= 3)
            .map(|r| (r[1].as_str(), r[2].as_str()))
            .collect()
    }
}

fn is_marker(fields: &[String], first: &str) -> bool {
    fields.len() >= 2 && fields[0] == first && fields[1] == "LIST"
}

/// Incremental decoder for the NUT response stream.
#[derive(Debug)]
pub struct Decoder {
    tokenizer: Tokenizer,
    data: Vec<Vec<String>>,
    in_list: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            tokenizer: NUT_GRAMMAR.tokenizer(),
            data: Vec::new(),
            in_list: false,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while inside a `BEGIN LIST` block.
    pub fn in_list(&self) -> bool {
        self.in_list
    }

    fn on_line(&mut self, fields: Vec<String>) -> Result<Option<Response>, ProtocolError> {
        if is_marker(&fields, "BEGIN") {
            self.in_list = true;
        } else if is_marker(&fields, "END") {
            self.in_list = false;
        } else if fields[0] == "ERR" && !self.in_list {
            let id = fields.get(1).ok_or(ProtocolError::MissingErrorId)?;
            return Ok(Some(Response {
                error: Some(id.clone()),
                data: std::mem::take(&mut self.data),
            }));
        } else {
            self.data.push(fields);
        }

        if self.in_list {
            return Ok(None);
        }
        Ok(Some(Response {
            error: None,
            data: std::mem::take(&mut self.data),
        }))
    }
}

impl ResponseDecoder for Decoder {
    type Response = Response;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        for i in 0..buf.len() {
            if let Some(fields) = self.tokenizer.push(buf[i])? {
                if let Some(response) = self.on_line(fields)? {
                    buf.advance(i + 1);
                    return Ok(Some(response));
                }
            }
        }
        // Partial tokens live in the tokenizer, nothing needs to stay behind
        buf.clear();
        Ok(None)
    }

    fn clear(&mut self) {
        self.tokenizer.reset();
        self.data.clear();
        self.in_list = false;
    }
}
