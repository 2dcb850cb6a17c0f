//! Recording collaborators for driving connections by hand in tests.

use crate::connection::{Connection, Protocol};
use crate::reactor::{Connector, Interest, Poller};
use crate::stream::Target;
use std::cell::RefCell;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Log {
    pub watched: Option<(RawFd, Interest)>,
    pub unwatches: usize,
    pub timer: Option<Duration>,
    pub connects: Vec<(String, String)>,
    pub cancels: usize,
}

#[derive(Clone, Default)]
pub struct Recorder(pub Rc<RefCell<Log>>);

impl Poller for Recorder {
    fn watch(&mut self, fd: BorrowedFd<'_>, interest: Interest) {
        self.0.borrow_mut().watched = Some((fd.as_raw_fd(), interest));
    }

    fn unwatch(&mut self) {
        let mut log = self.0.borrow_mut();
        log.watched = None;
        log.unwatches += 1;
    }

    fn set_timer(&mut self, after: Duration) {
        self.0.borrow_mut().timer = Some(after);
    }

    fn cancel_timer(&mut self) {
        self.0.borrow_mut().timer = None;
    }
}

impl Connector for Recorder {
    fn connect(&mut self, host: &str, service: &str) {
        self.0
            .borrow_mut()
            .connects
            .push((host.to_string(), service.to_string()));
    }

    fn cancel(&mut self) {
        self.0.borrow_mut().cancels += 1;
    }
}

/// A disconnected client wired to a recorder.
pub fn client<P: Protocol>() -> (Connection<P>, Rc<RefCell<Log>>) {
    let recorder = Recorder::default();
    let log = recorder.0.clone();
    let client = Connection::new(Box::new(recorder.clone()), Box::new(recorder));
    (client, log)
}

/// A connected client and the server end of its socket.
pub fn connected<P: Protocol>() -> (Connection<P>, UnixStream, Rc<RefCell<Log>>) {
    let (mut client, log) = client::<P>();
    client.connect(&Target::tcp("localhost", "0")).unwrap();

    let (ours, theirs) = UnixStream::pair().unwrap();
    theirs.set_nonblocking(true).unwrap();
    client.on_connect_result(Ok(ours.into()));
    assert!(client.is_connected());
    (client, theirs, log)
}

/// Everything the client has sent so far.
pub fn read_available(server: &mut UnixStream) -> String {
    let mut out = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match server.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {}", e),
        }
    }
    String::from_utf8(out).unwrap()
}
