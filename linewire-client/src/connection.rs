//! Connection lifecycle, buffering and response dispatch.
//!
//! [`Connection`] is written once and instantiated per protocol through
//! the [`Protocol`] trait. It owns the socket, both buffers, the decoder
//! and the task queue; everything is torn down together by [`reset`].
//!
//! [`reset`]: Connection::reset

use crate::error::ClientError;
use crate::io::{try_read, try_write, IoStatus};
use crate::reactor::{Connector, Interest, Poller};
use crate::stream::{Stream, Target};
use crate::task::{TaskId, TaskQueue};
use bytes::BytesMut;
use linewire_protocol::mpd::SubsystemMask;
use linewire_protocol::{Grammar, ProtocolError, ResponseDecoder};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Read buffer capacity reserved up front.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the connector.
    Connecting,
    Connected,
}

/// Notifications for the owner of a connection, drained with
/// [`Connection::poll_event`].
#[derive(Debug)]
pub enum ClientEvent {
    /// The socket is up. Commands may be sent.
    Connected,
    /// The connection was torn down. Emitted exactly once per failure,
    /// including deliberate disconnects.
    Failed(ClientError),
    /// MPD reported changes while idling.
    Idle(SubsystemMask),
}

/// Per-protocol behavior plugged into [`Connection`].
pub trait Protocol: Sized + 'static {
    /// Name used in log lines.
    const NAME: &'static str;
    const GRAMMAR: Grammar;
    /// Whether Unix-domain socket targets are allowed.
    const LOCAL_SOCKETS: bool;

    type Decoder: ResponseDecoder<Response = Self::Response>;
    type Response: Debug + 'static;
    /// Extra state, reset to its default on every disconnect.
    type State: Default;

    /// Refuses task registration in states where no response would be
    /// matched to it.
    fn check_task(_conn: &Connection<Self>) -> Result<(), ClientError> {
        Ok(())
    }

    /// Runs before every command line is queued.
    fn before_send(_conn: &mut Connection<Self>) {}

    /// Runs when the connection timer expires.
    fn on_timer(_conn: &mut Connection<Self>) {}
}

/// A pipelined client connection.
pub struct Connection<P: Protocol> {
    state: ConnectionState,
    peer: Option<String>,
    stream: Option<Stream>,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    decoder: P::Decoder,
    ext: P::State,
    tasks: TaskQueue<Connection<P>, P::Response>,
    events: VecDeque<ClientEvent>,
    /// Bumped on every reset so in-flight passes notice teardown.
    generation: u64,
    poller: Box<dyn Poller>,
    connector: Box<dyn Connector>,
}

impl<P: Protocol> Connection<P> {
    pub fn new(poller: Box<dyn Poller>, connector: Box<dyn Connector>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            peer: None,
            stream: None,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_buffer: BytesMut::new(),
            decoder: P::Decoder::default(),
            ext: P::State::default(),
            tasks: TaskQueue::new(),
            events: VecDeque::new(),
            generation: 0,
            poller,
            connector,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Target of the current or pending connection.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Number of tasks awaiting a response.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Bytes queued but not yet sent.
    pub fn pending_output(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Returns true if the socket should be watched for writability.
    pub fn wants_write(&self) -> bool {
        self.stream.is_some() && !self.write_buffer.is_empty()
    }

    /// Takes the oldest undelivered notification.
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub(crate) fn push_event(&mut self, event: ClientEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn ext(&self) -> &P::State {
        &self.ext
    }

    pub(crate) fn ext_mut(&mut self) -> &mut P::State {
        &mut self.ext
    }

    pub(crate) fn decoder(&self) -> &P::Decoder {
        &self.decoder
    }

    pub(crate) fn set_timer(&mut self, after: Duration) {
        self.poller.set_timer(after);
    }

    pub(crate) fn cancel_timer(&mut self) {
        self.poller.cancel_timer();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts connecting to `target`.
    ///
    /// Socket paths are connected synchronously and the connection is up
    /// when this returns; network targets are handed to the connector.
    pub fn connect(&mut self, target: &Target) -> Result<(), ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        match target {
            Target::Unix(path) => {
                if !P::LOCAL_SOCKETS {
                    return Err(ClientError::UnsupportedTarget(target.to_string()));
                }
                let stream = UnixStream::connect(path).map_err(|source| ClientError::Connect {
                    target: target.to_string(),
                    source,
                })?;
                self.peer = Some(target.to_string());
                if let Err(e) = self.finish_connection(stream.into()) {
                    self.peer = None;
                    return Err(e.into());
                }
            }
            Target::Tcp { host, service } => {
                tracing::debug!("{}: connecting to {}", P::NAME, target);
                self.peer = Some(target.to_string());
                self.state = ConnectionState::Connecting;
                self.connector.connect(host, service);
            }
        }
        Ok(())
    }

    /// Delivers the outcome of a connector attempt.
    pub fn on_connect_result(&mut self, result: std::io::Result<Stream>) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!("{}: ignoring stale connect result", P::NAME);
            return;
        }
        // The connector is done either way
        self.state = ConnectionState::Disconnected;

        match result {
            Ok(stream) => {
                if let Err(e) = self.finish_connection(stream) {
                    self.fail(ClientError::Io(e));
                }
            }
            Err(source) => {
                let target = self.peer.clone().unwrap_or_default();
                self.fail(ClientError::Connect { target, source });
            }
        }
    }

    fn finish_connection(&mut self, stream: Stream) -> std::io::Result<()> {
        stream.set_nonblocking(true)?;
        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.update_poller();

        tracing::debug!(
            "{}: connected to {}",
            P::NAME,
            self.peer.as_deref().unwrap_or("?")
        );
        self.events.push_back(ClientEvent::Connected);
        Ok(())
    }

    /// Tears everything down without notifying anyone.
    ///
    /// Pending tasks are dropped and their handlers never run.
    pub fn reset(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.connector.cancel();
        }
        // Unwatch while the fd is still open
        if self.stream.is_some() {
            self.poller.unwatch();
            self.stream = None;
        }
        self.poller.cancel_timer();

        self.read_buffer.clear();
        self.write_buffer.clear();
        self.decoder.clear();
        self.ext = P::State::default();

        let dropped = self.tasks.clear();
        if dropped > 0 {
            tracing::debug!("{}: dropped {} pending tasks", P::NAME, dropped);
        }

        self.peer = None;
        self.state = ConnectionState::Disconnected;
        self.generation += 1;
    }

    /// Resets and reports `error` as the single failure notification.
    pub(crate) fn fail(&mut self, error: ClientError) {
        let peer = self.peer.as_deref().unwrap_or("?");
        match &error {
            ClientError::Disconnected => tracing::debug!("{}: disconnected from {}", P::NAME, peer),
            _ => tracing::warn!("{}: connection to {} failed: {}", P::NAME, peer, error),
        }

        self.reset();
        self.events.push_back(ClientEvent::Failed(error));
    }

    /// Closes the connection deliberately. Reported like any other failure.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.fail(ClientError::Disconnected);
        }
    }

    // =========================================================================
    // Readiness callbacks
    // =========================================================================

    /// Handles socket readiness: reads, dispatches, then flushes output.
    ///
    /// Input received together with an end of stream is still dispatched
    /// before the connection fails.
    pub fn on_ready(&mut self) {
        let generation = self.generation;
        let read = match self.stream.as_mut() {
            Some(stream) => try_read(stream, &mut self.read_buffer),
            None => return,
        };

        if let Err(e) = self.process_input(generation) {
            return self.fail(e.into());
        }
        // A handler tore the connection down
        if self.generation != generation {
            return;
        }

        match read {
            Ok(IoStatus::Ok) => {}
            Ok(IoStatus::EndOfStream) => return self.fail(ClientError::ConnectionClosed),
            Err(e) => return self.fail(ClientError::Io(e)),
        }

        let written = match self.stream.as_mut() {
            Some(stream) => try_write(stream, &mut self.write_buffer),
            None => return,
        };
        match written {
            Ok(IoStatus::Ok) => self.update_poller(),
            Ok(IoStatus::EndOfStream) => self.fail(ClientError::ConnectionClosed),
            Err(e) => self.fail(ClientError::Io(e)),
        }
    }

    /// Handles expiry of the timer armed through the poller.
    pub fn on_timer(&mut self) {
        if self.state == ConnectionState::Connected {
            P::on_timer(self);
        }
    }

    fn process_input(&mut self, generation: u64) -> Result<(), ProtocolError> {
        while self.generation == generation {
            match self.decoder.decode(&mut self.read_buffer)? {
                Some(response) => self.dispatch_head(response),
                None => break,
            }
        }
        Ok(())
    }

    fn dispatch_head(&mut self, response: P::Response) {
        match self.tasks.pop_head() {
            Some(task) => {
                tracing::trace!("{} >> {} {:?}", P::NAME, task.id(), response);
                task.complete(self, response);
            }
            None => tracing::warn!("{}: dropping unmatched response {:?}", P::NAME, response),
        }
    }

    fn update_poller(&mut self) {
        if let Some(stream) = &self.stream {
            let interest = if self.write_buffer.is_empty() {
                Interest::Read
            } else {
                Interest::ReadWrite
            };
            self.poller.watch(stream.as_fd(), interest);
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Serializes a command and queues it for sending.
    ///
    /// No task is registered; pair with [`add_task`](Self::add_task) or
    /// use [`command`](Self::command).
    pub fn send_command<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), ClientError> {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::NotConnected);
        }
        P::before_send(self);
        self.queue_line(args);
        Ok(())
    }

    pub(crate) fn queue_line<S: AsRef<str>>(&mut self, args: &[S]) {
        let start = self.write_buffer.len();
        P::GRAMMAR.encode_into(args, &mut self.write_buffer);
        tracing::debug!(
            "{} << {}",
            P::NAME,
            String::from_utf8_lossy(&self.write_buffer[start..self.write_buffer.len() - 1])
        );
        self.update_poller();
    }

    /// Registers a handler for the next unclaimed response.
    pub fn add_task<F>(&mut self, handler: F) -> Result<TaskId, ClientError>
    where
        F: FnOnce(&mut Self, P::Response) + 'static,
    {
        self.check_task()?;
        Ok(self.tasks.enqueue(Some(Box::new(handler))))
    }

    /// Registers a task whose response is discarded.
    pub fn add_silent_task(&mut self) -> Result<TaskId, ClientError> {
        self.check_task()?;
        Ok(self.tasks.enqueue(None))
    }

    /// Sends a command and registers `handler` for its response.
    pub fn command<S, F>(&mut self, args: &[S], handler: F) -> Result<TaskId, ClientError>
    where
        S: AsRef<str>,
        F: FnOnce(&mut Self, P::Response) + 'static,
    {
        self.check_task()?;
        self.send_command(args)?;
        self.add_task(handler)
    }

    fn check_task(&self) -> Result<(), ClientError> {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::NotConnected);
        }
        P::check_task(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nut::{Nut, NutClient};
    use crate::testing::{self, read_available};
    use linewire_protocol::nut::Response;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    fn collector() -> (
        Rc<RefCell<Vec<(usize, Response)>>>,
        impl Fn(usize) -> Box<dyn FnOnce(&mut NutClient, Response)>,
    ) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let make = move |i: usize| {
            let sink = sink.clone();
            Box::new(move |_: &mut NutClient, r: Response| sink.borrow_mut().push((i, r)))
                as Box<dyn FnOnce(&mut NutClient, Response)>
        };
        (seen, make)
    }

    #[test]
    fn test_connect_through_connector() {
        let (mut client, log) = testing::client::<Nut>();
        client.connect(&Target::tcp("ups.local", "3493")).unwrap();

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(
            log.borrow().connects,
            vec![("ups.local".to_string(), "3493".to_string())]
        );
        assert!(matches!(
            client.connect(&Target::tcp("other", "1")),
            Err(ClientError::AlreadyConnected)
        ));

        let (a, _b) = UnixStream::pair().unwrap();
        client.on_connect_result(Ok(a.into()));
        assert!(client.is_connected());
        assert!(matches!(client.poll_event(), Some(ClientEvent::Connected)));
        assert_eq!(log.borrow().watched.map(|(_, i)| i), Some(Interest::Read));
    }

    #[test]
    fn test_connect_failure_reports_once() {
        let (mut client, log) = testing::client::<Nut>();
        client.connect(&Target::tcp("ups.local", "3493")).unwrap();
        client.on_connect_result(Err(std::io::ErrorKind::ConnectionRefused.into()));

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(log.borrow().cancels, 0);
        match client.poll_event() {
            Some(ClientEvent::Failed(ClientError::Connect { target, .. })) => {
                assert_eq!(target, "ups.local:3493")
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_stale_connect_result_ignored() {
        let (mut client, log) = testing::client::<Nut>();
        client.connect(&Target::tcp("ups.local", "3493")).unwrap();
        client.reset();
        assert_eq!(log.borrow().cancels, 1);

        let (a, _b) = UnixStream::pair().unwrap();
        client.on_connect_result(Ok(a.into()));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_nut_rejects_local_socket() {
        let (mut client, _log) = testing::client::<Nut>();
        assert!(matches!(
            client.connect(&Target::unix("/run/nut/upsd.sock")),
            Err(ClientError::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut client, _log) = testing::client::<Nut>();
        assert!(matches!(
            client.send_command(&["LIST", "UPS"]),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.add_silent_task(),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_pipelined_fifo_dispatch() {
        let (mut client, mut server, log) = testing::connected::<Nut>();
        let (seen, make) = collector();

        for (i, ups) in ["a", "b", "c"].into_iter().enumerate() {
            client.command(&["LIST", "VAR", ups], make(i)).unwrap();
        }
        assert_eq!(
            log.borrow().watched.map(|(_, i)| i),
            Some(Interest::ReadWrite)
        );
        assert_eq!(client.pending_tasks(), 3);

        client.on_ready();
        assert!(!client.wants_write());
        assert_eq!(log.borrow().watched.map(|(_, i)| i), Some(Interest::Read));
        assert_eq!(
            read_available(&mut server),
            "LIST VAR a\nLIST VAR b\nLIST VAR c\n"
        );

        server
            .write_all(
                b"BEGIN LIST VAR a\nVAR a x 1\nEND LIST VAR a\n\
                  ERR UNKNOWN-UPS\n\
                  BEGIN LIST VAR c\nVAR c x 3\n",
            )
            .unwrap();
        client.on_ready();
        {
            let seen = seen.borrow();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0].0, 0);
            assert_eq!(seen[0].1.vars(), vec![("x", "1")]);
            assert_eq!(seen[1].0, 1);
            assert_eq!(seen[1].1.error.as_deref(), Some("UNKNOWN-UPS"));
        }

        // Command failures are not fatal
        assert!(client.is_connected());

        server.write_all(b"END LIST VAR c\n").unwrap();
        client.on_ready();
        assert_eq!(seen.borrow().len(), 3);
        assert_eq!(seen.borrow()[2].1.vars(), vec![("x", "3")]);
        assert_eq!(client.pending_tasks(), 0);
    }

    #[test]
    fn test_reset_drains_without_firing() {
        let (mut client, _server, log) = testing::connected::<Nut>();
        let (seen, make) = collector();

        for i in 0..3 {
            client.command(&["LIST", "UPS"], make(i)).unwrap();
        }
        client.reset();

        assert_eq!(client.pending_tasks(), 0);
        assert!(client.pending_output().is_empty());
        assert!(seen.borrow().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(log.borrow().unwatches, 1);

        // Silent: only the earlier Connected event is queued
        assert!(matches!(client.poll_event(), Some(ClientEvent::Connected)));
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_disconnect_reports_once() {
        let (mut client, _server, _log) = testing::connected::<Nut>();
        client.poll_event();

        client.disconnect();
        client.disconnect();

        assert!(matches!(
            client.poll_event(),
            Some(ClientEvent::Failed(ClientError::Disconnected))
        ));
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_input_before_eof_is_dispatched() {
        let (mut client, mut server, _log) = testing::connected::<Nut>();
        client.poll_event();
        let (seen, make) = collector();

        client.command(&["LOGOUT"], make(0)).unwrap();
        client.on_ready();
        assert_eq!(read_available(&mut server), "LOGOUT\n");

        server.write_all(b"OK Goodbye\n").unwrap();
        drop(server);
        client.on_ready();

        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].1.is_ok());
        assert!(matches!(
            client.poll_event(),
            Some(ClientEvent::Failed(ClientError::ConnectionClosed))
        ));
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let (mut client, mut server, _log) = testing::connected::<Nut>();
        client.poll_event();
        let (seen, make) = collector();

        client.command(&["GET", "VAR", "ups", "x"], make(0)).unwrap();
        client.on_ready();
        server.write_all(b"VAR ups \"oops\n").unwrap();
        client.on_ready();

        assert!(seen.borrow().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.poll_event(),
            Some(ClientEvent::Failed(ClientError::Protocol(
                ProtocolError::UnterminatedQuote
            )))
        ));
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let (mut client, mut server, _log) = testing::connected::<Nut>();
        client.poll_event();

        server.write_all(b"OK\n").unwrap();
        client.on_ready();

        assert!(client.is_connected());
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_handler_can_send_follow_up() {
        let (mut client, mut server, _log) = testing::connected::<Nut>();
        let (seen, make) = collector();
        let follow_up = make(1);

        client
            .command(&["LIST", "UPS"], move |client: &mut NutClient, r: Response| {
                let names: Vec<String> = r.ups_names().iter().map(|s| s.to_string()).collect();
                for name in names {
                    client.send_command(&["LIST", "VAR", name.as_str()]).unwrap();
                }
                client.add_task(follow_up).unwrap();
            })
            .unwrap();
        client.on_ready();
        assert_eq!(read_available(&mut server), "LIST UPS\n");

        server
            .write_all(b"BEGIN LIST UPS\nUPS eaton \"Eaton\"\nEND LIST UPS\n")
            .unwrap();
        client.on_ready();
        assert_eq!(read_available(&mut server), "LIST VAR eaton\n");
        assert_eq!(client.pending_tasks(), 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_handler_reset_stops_processing() {
        let (mut client, mut server, _log) = testing::connected::<Nut>();
        let (seen, make) = collector();

        client
            .command(&["LIST", "UPS"], |client: &mut NutClient, _| client.reset())
            .unwrap();
        client.command(&["LIST", "UPS"], make(1)).unwrap();
        client.on_ready();

        server.write_all(b"OK\nOK\n").unwrap();
        client.on_ready();

        assert!(seen.borrow().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    proptest! {
        #[test]
        fn prop_responses_follow_request_order(
            steps in prop::collection::vec(any::<bool>(), 1..40),
            chunk in 1usize..16
        ) {
            let (mut client, mut server, _log) = testing::connected::<Nut>();
            let (seen, make) = collector();
            let mut sent = 0;
            let mut answered = 0;

            for send in steps {
                if send || answered == sent {
                    let name = format!("v{}", sent);
                    client.command(&["GET", "VAR", "ups", name.as_str()], make(sent)).unwrap();
                    client.on_ready();
                    sent += 1;
                } else {
                    let reply = if answered % 3 == 2 {
                        "ERR VAR-NOT-SUPPORTED\n".to_string()
                    } else {
                        format!("VAR ups v{} \"{}\"\n", answered, answered)
                    };
                    for piece in reply.as_bytes().chunks(chunk) {
                        server.write_all(piece).unwrap();
                        client.on_ready();
                    }
                    answered += 1;
                }
            }
            read_available(&mut server);

            let seen = seen.borrow();
            prop_assert_eq!(seen.len(), answered);
            for (k, (index, response)) in seen.iter().enumerate() {
                prop_assert_eq!(*index, k);
                if k % 3 == 2 {
                    prop_assert_eq!(response.error.as_deref(), Some("VAR-NOT-SUPPORTED"));
                } else {
                    prop_assert_eq!(&response.data[0][2], &format!("v{}", k));
                }
            }
            prop_assert_eq!(client.pending_tasks(), sent - answered);
            prop_assert!(client.is_connected());
        }
    }
}
