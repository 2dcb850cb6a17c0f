//! Partial reads and writes over non-blocking sockets.
//!
//! Both helpers loop until the socket would block, so a readiness-driven
//! caller can invoke them on every wakeup.

use bytes::{Buf, BytesMut};
use std::io::{self, ErrorKind, Read, Write};

const READ_CHUNK_SIZE: usize = 4096;

/// Outcome of a successful I/O pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// Everything available was transferred, or the socket would block.
    Ok,
    /// The peer shut the connection down.
    EndOfStream,
}

/// Appends everything currently readable to `buf`.
///
/// Bytes read before an end of stream or error stay in `buf`.
pub fn try_read<R: Read + ?Sized>(reader: &mut R, buf: &mut BytesMut) -> io::Result<IoStatus> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(IoStatus::EndOfStream),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(IoStatus::Ok),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Sends as much of `buf` as the socket accepts, removing sent bytes.
pub fn try_write<W: Write + ?Sized>(writer: &mut W, buf: &mut BytesMut) -> io::Result<IoStatus> {
    while !buf.is_empty() {
        match writer.write(&buf[..]) {
            Ok(0) => return Ok(IoStatus::EndOfStream),
            Ok(n) => buf.advance(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(IoStatus::Ok),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(IoStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a script of read/write results.
    struct Scripted {
        steps: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        accept: usize,
    }

    impl Scripted {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
                written: Vec::new(),
                accept: usize::MAX,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(data)) => {
                    out[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if let Some(Err(e)) = self.steps.pop_front() {
                return Err(e);
            }
            if self.accept == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = data.len().min(self.accept).min(3);
            self.accept -= n;
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_until_would_block() {
        let mut src = Scripted::new(vec![
            Ok(b"OK MPD".to_vec()),
            Err(ErrorKind::Interrupted.into()),
            Ok(b" 0.23.5\n".to_vec()),
        ]);
        let mut buf = BytesMut::new();

        assert_eq!(try_read(&mut src, &mut buf).unwrap(), IoStatus::Ok);
        assert_eq!(&buf[..], b"OK MPD 0.23.5\n");
    }

    #[test]
    fn test_read_end_of_stream_keeps_data() {
        let mut src = Scripted::new(vec![Ok(b"OK Goodbye\n".to_vec()), Ok(Vec::new())]);
        let mut buf = BytesMut::new();

        assert_eq!(try_read(&mut src, &mut buf).unwrap(), IoStatus::EndOfStream);
        assert_eq!(&buf[..], b"OK Goodbye\n");
    }

    #[test]
    fn test_read_error() {
        let mut src = Scripted::new(vec![Err(ErrorKind::ConnectionReset.into())]);
        let mut buf = BytesMut::new();

        let err = try_read(&mut src, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_write_partial() {
        let mut dst = Scripted::new(vec![]);
        dst.accept = 5;
        let mut buf = BytesMut::from(&b"status\n"[..]);

        assert_eq!(try_write(&mut dst, &mut buf).unwrap(), IoStatus::Ok);
        assert_eq!(dst.written, b"statu");
        assert_eq!(&buf[..], b"s\n");

        dst.accept = usize::MAX;
        assert_eq!(try_write(&mut dst, &mut buf).unwrap(), IoStatus::Ok);
        assert_eq!(dst.written, b"status\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_retries_interrupt() {
        let mut dst = Scripted::new(vec![Err(ErrorKind::Interrupted.into())]);
        let mut buf = BytesMut::from(&b"ping\n"[..]);

        assert_eq!(try_write(&mut dst, &mut buf).unwrap(), IoStatus::Ok);
        assert_eq!(dst.written, b"ping\n");
    }

    #[test]
    fn test_write_error() {
        let mut dst = Scripted::new(vec![Err(ErrorKind::BrokenPipe.into())]);
        let mut buf = BytesMut::from(&b"ping\n"[..]);

        let err = try_write(&mut dst, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
        assert_eq!(&buf[..], b"ping\n");
    }

    #[test]
    fn test_write_empty_buffer() {
        let mut dst = Scripted::new(vec![Err(ErrorKind::BrokenPipe.into())]);
        let mut buf = BytesMut::new();
        assert_eq!(try_write(&mut dst, &mut buf).unwrap(), IoStatus::Ok);
    }
}
