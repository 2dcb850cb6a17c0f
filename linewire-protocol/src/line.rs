//! Newline splitting over a growable input buffer.

use bytes::BytesMut;

/// Splits the first complete line off `buf`, without its `\n`.
///
/// Returns `None` and leaves `buf` untouched if no newline is buffered.
pub fn next_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    Some(line)
}

/// Converts a raw line to text. Invalid UTF-8 is replaced rather than
/// rejected since both protocols are byte-oriented.
pub fn to_text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
