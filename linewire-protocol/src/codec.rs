//! Argument quoting, line serialization and the quoted-token tokenizer.
//!
//! Both protocols share one engine. A [`Grammar`] carries the rules that
//! differ between them: which bytes force an argument into quotes, which
//! bytes are backslash-escaped inside quotes, and whether a backslash is
//! special outside of quotes.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Quoting and tokenizing rules for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grammar {
    /// Short protocol name, used in log lines.
    pub name: &'static str,
    /// Bytes above 0x20 that force quoting.
    quote_triggers: &'static [u8],
    /// Bytes prefixed with a backslash inside quotes.
    escaped: &'static [u8],
    /// Whether a backslash escapes the next byte outside of quotes.
    unquoted_escapes: bool,
}

/// MPD: quote on `"` and `'`, escape only `"`.
pub const MPD_GRAMMAR: Grammar = Grammar {
    name: "MPD",
    quote_triggers: b"\"'",
    escaped: b"\"",
    unquoted_escapes: false,
};

/// NUT: quote on `"` and `\`, escape both.
pub const NUT_GRAMMAR: Grammar = Grammar {
    name: "NUT",
    quote_triggers: b"\"\\",
    escaped: b"\"\\",
    unquoted_escapes: true,
};

impl Grammar {
    /// Returns true if `arg` has to be sent in quotes.
    pub fn must_quote(&self, arg: &str) -> bool {
        arg.is_empty()
            || arg
                .bytes()
                .any(|b| b <= b' ' || self.quote_triggers.contains(&b))
    }

    /// Appends `arg` to `out`, quoted and escaped if needed.
    pub fn quote_into(&self, arg: &str, out: &mut String) {
        if !self.must_quote(arg) {
            out.push_str(arg);
            return;
        }

        out.push('"');
        for c in arg.chars() {
            if c.is_ascii() && self.escaped.contains(&(c as u8)) {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }

    /// Joins arguments into one command line without the trailing newline.
    pub fn serialize<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut line = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            self.quote_into(arg.as_ref(), &mut line);
        }
        line
    }

    /// Serializes a command and appends it, newline-terminated, to `buf`.
    pub fn encode_into<S: AsRef<str>>(&self, args: &[S], buf: &mut BytesMut) {
        let line = self.serialize(args);
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
    }

    /// Creates a tokenizer following this grammar.
    pub fn tokenizer(&self) -> Tokenizer {
        Tokenizer::new(*self)
    }

    /// Tokenizes a single line. A missing trailing newline is implied.
    ///
    /// Returns an empty list for blank lines.
    pub fn tokenize(&self, line: &str) -> Result<Vec<String>, ProtocolError> {
        let mut tokenizer = self.tokenizer();
        for &b in line.as_bytes() {
            if let Some(fields) = tokenizer.push(b)? {
                return Ok(fields);
            }
        }
        Ok(tokenizer.push(b'\n')?.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Between,
    Unquoted,
    UnquotedEscape,
    Quoted,
    QuotedEscape,
    QuotedEnd,
}

/// Byte-at-a-time tokenizer for lines of optionally quoted fields.
#[derive(Debug)]
pub struct Tokenizer {
    grammar: Grammar,
    state: State,
    field: Vec<u8>,
    fields: Vec<String>,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

impl Tokenizer {
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            state: State::StartLine,
            field: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Feeds one byte. Returns the fields of a line once its newline
    /// has been consumed.
    ///
    /// Errors leave the tokenizer at the start of a fresh line.
    pub fn push(&mut self, c: u8) -> Result<Option<Vec<String>>, ProtocolError> {
        let result = self.step(c);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn step(&mut self, c: u8) -> Result<Option<Vec<String>>, ProtocolError> {
        match self.state {
            State::StartLine | State::Between => {
                if self.state == State::StartLine {
                    self.fields.clear();
                    self.field.clear();
                    self.state = State::Between;
                }
                if c == b'\\' && self.grammar.unquoted_escapes {
                    self.state = State::UnquotedEscape;
                } else if c == b'"' {
                    self.state = State::Quoted;
                } else if c == b'\n' {
                    if !self.fields.is_empty() {
                        return Ok(Some(self.finish_line()));
                    }
                } else if !is_space(c) {
                    self.field.push(c);
                    self.state = State::Unquoted;
                }
                Ok(None)
            }
            State::Unquoted => {
                if c == b'\\' && self.grammar.unquoted_escapes {
                    self.state = State::UnquotedEscape;
                } else if c == b'"' {
                    return Err(ProtocolError::UnexpectedQuote);
                } else if !is_space(c) {
                    self.field.push(c);
                } else {
                    return Ok(self.end_field(c));
                }
                Ok(None)
            }
            State::UnquotedEscape => {
                self.field.push(c);
                self.state = State::Unquoted;
                Ok(None)
            }
            State::Quoted => {
                match c {
                    b'\\' => self.state = State::QuotedEscape,
                    b'"' => self.state = State::QuotedEnd,
                    b'\n' => return Err(ProtocolError::UnterminatedQuote),
                    _ => self.field.push(c),
                }
                Ok(None)
            }
            State::QuotedEscape => {
                self.field.push(c);
                self.state = State::Quoted;
                Ok(None)
            }
            State::QuotedEnd => {
                if !is_space(c) {
                    return Err(ProtocolError::TrailingAfterQuote(c));
                }
                Ok(self.end_field(c))
            }
        }
    }

    fn end_field(&mut self, c: u8) -> Option<Vec<String>> {
        let bytes = std::mem::take(&mut self.field);
        self.fields.push(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        });

        if c == b'\n' {
            return Some(self.finish_line());
        }
        self.state = State::Between;
        None
    }

    fn finish_line(&mut self) -> Vec<String> {
        self.state = State::StartLine;
        std::mem::take(&mut self.fields)
    }

    /// Returns true when no partial line is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::StartLine
            || (self.state == State::Between && self.fields.is_empty())
    }

    /// Drops any partial line.
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.field.clear();
        self.fields.clear();
    }
}

/// Turns buffered input into complete protocol responses.
pub trait ResponseDecoder: Default {
    type Response;

    /// Consumes input from `buf` until one full response is available.
    ///
    /// Bytes belonging to an incomplete line stay in `buf` (or inside the
    /// decoder) for the next call. Any error is fatal to the connection.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Response>, ProtocolError>;

    /// Forgets all partial state, e.g. after a reconnect.
    fn clear(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mpd_quoting() {
        assert_eq!(MPD_GRAMMAR.serialize(&["play"]), "play");
        assert_eq!(MPD_GRAMMAR.serialize(&["play", "3"]), "play 3");
        assert_eq!(MPD_GRAMMAR.serialize(&["find", ""]), "find \"\"");
        assert_eq!(
            MPD_GRAMMAR.serialize(&["find", "title", "Hey Jude"]),
            "find title \"Hey Jude\""
        );
        assert_eq!(
            MPD_GRAMMAR.serialize(&["search", "don't"]),
            "search \"don't\""
        );
        assert_eq!(
            MPD_GRAMMAR.serialize(&["search", "say \"hi\""]),
            r#"search "say \"hi\"""#
        );
        // Backslash neither triggers quoting nor gets escaped
        assert_eq!(MPD_GRAMMAR.serialize(&["add", r"a\b"]), r"add a\b");
        assert_eq!(MPD_GRAMMAR.serialize(&["add", r"a b\c"]), r#"add "a b\c""#);
    }

    #[test]
    fn test_nut_quoting() {
        assert_eq!(NUT_GRAMMAR.serialize(&["LIST", "UPS"]), "LIST UPS");
        assert_eq!(NUT_GRAMMAR.serialize(&["LIST", "VAR", ""]), "LIST VAR \"\"");
        assert_eq!(NUT_GRAMMAR.serialize(&["a'b"]), "a'b");
        assert_eq!(NUT_GRAMMAR.serialize(&[r"a\b"]), r#""a\\b""#);
        assert_eq!(NUT_GRAMMAR.serialize(&["x \"y\""]), r#""x \"y\"""#);
        assert_eq!(NUT_GRAMMAR.serialize(&["tab\there"]), "\"tab\there\"");
    }

    #[test]
    fn test_encode_into_appends_newline() {
        let mut buf = BytesMut::new();
        MPD_GRAMMAR.encode_into(&["status"], &mut buf);
        NUT_GRAMMAR.encode_into(&["LIST", "VAR", "ups 1"], &mut buf);
        assert_eq!(&buf[..], b"status\nLIST VAR \"ups 1\"\n");
    }

    #[test]
    fn test_tokenize_quoted_fields() {
        let fields = NUT_GRAMMAR
            .tokenize("VAR ups \"Battery Status\" \"charging now\"")
            .unwrap();
        assert_eq!(fields, vec!["VAR", "ups", "Battery Status", "charging now"]);
    }

    #[test]
    fn test_tokenize_escapes() {
        let fields = NUT_GRAMMAR.tokenize(r#"a\ b "c\"d" "e\\f""#).unwrap();
        assert_eq!(fields, vec!["a b", "c\"d", r"e\f"]);

        // Backslash is literal outside quotes for MPD
        let fields = MPD_GRAMMAR.tokenize(r"a\b").unwrap();
        assert_eq!(fields, vec![r"a\b"]);
    }

    #[test]
    fn test_tokenize_whitespace() {
        let fields = NUT_GRAMMAR.tokenize("  A \t B  ").unwrap();
        assert_eq!(fields, vec!["A", "B"]);

        assert!(NUT_GRAMMAR.tokenize("").unwrap().is_empty());
        assert!(NUT_GRAMMAR.tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_empty_quoted_field() {
        let fields = NUT_GRAMMAR.tokenize("A \"\" B").unwrap();
        assert_eq!(fields, vec!["A", "", "B"]);
    }

    #[test]
    fn test_tokenize_errors() {
        assert_eq!(
            NUT_GRAMMAR.tokenize("VAR ups \"oops"),
            Err(ProtocolError::UnterminatedQuote)
        );
        assert_eq!(
            NUT_GRAMMAR.tokenize("ab\"c"),
            Err(ProtocolError::UnexpectedQuote)
        );
        assert_eq!(
            NUT_GRAMMAR.tokenize("\"ab\"c"),
            Err(ProtocolError::TrailingAfterQuote(b'c'))
        );
    }

    #[test]
    fn test_tokenizer_streaming() {
        let mut tokenizer = NUT_GRAMMAR.tokenizer();
        let input = b"\nBEGIN LIST UPS\nUPS ups \"Eaton 5E\"\n";

        let mut lines = Vec::new();
        for &b in input.iter() {
            if let Some(fields) = tokenizer.push(b).unwrap() {
                lines.push(fields);
            }
        }

        assert_eq!(
            lines,
            vec![
                vec!["BEGIN", "LIST", "UPS"],
                vec!["UPS", "ups", "Eaton 5E"],
            ]
        );
        assert!(tokenizer.is_idle());
    }

    #[test]
    fn test_tokenizer_recovers_after_error() {
        let mut tokenizer = NUT_GRAMMAR.tokenizer();
        let mut result = Ok(None);
        for &b in b"x\"" {
            result = tokenizer.push(b);
        }
        assert!(result.is_err());
        assert!(tokenizer.is_idle());

        let mut fields = None;
        for &b in b"OK\n" {
            fields = tokenizer.push(b).unwrap();
        }
        assert_eq!(fields, Some(vec!["OK".to_string()]));
    }

    #[test]
    fn test_tokenizer_utf8() {
        let fields = NUT_GRAMMAR.tokenize("desc \"Žluťoučký kůň\"").unwrap();
        assert_eq!(fields, vec!["desc", "Žluťoučký kůň"]);
    }

    fn arg_without(excluded: &'static [char]) -> impl Strategy<Value = String> {
        any::<String>().prop_map(move |s| s.chars().filter(|c| !excluded.contains(c)).collect())
    }

    proptest! {
        #[test]
        fn prop_nut_roundtrip(args in prop::collection::vec(arg_without(&['\n']), 1..6)) {
            let line = NUT_GRAMMAR.serialize(&args);
            prop_assert_eq!(NUT_GRAMMAR.tokenize(&line).unwrap(), args);
        }

        #[test]
        fn prop_mpd_roundtrip(args in prop::collection::vec(arg_without(&['\n', '\\']), 1..6)) {
            let line = MPD_GRAMMAR.serialize(&args);
            prop_assert_eq!(MPD_GRAMMAR.tokenize(&line).unwrap(), args);
        }

        #[test]
        fn prop_serialize_is_single_line(args in prop::collection::vec(arg_without(&['\n']), 0..6)) {
            prop_assert!(!NUT_GRAMMAR.serialize(&args).contains('\n'));
            prop_assert!(!MPD_GRAMMAR.serialize(&args).contains('\n'));
        }
    }
}
