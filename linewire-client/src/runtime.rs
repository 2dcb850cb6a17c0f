//! tokio-backed event loop for connections.
//!
//! [`TokioReactor`] implements both collaborator seams by recording what
//! the connection asked for; [`Driver`] turns those records into tokio
//! futures and feeds the wakeups back. Everything stays on one thread.

use crate::connection::{ClientEvent, Connection, Protocol};
use crate::error::ClientError;
use crate::reactor::{Connector, Interest, Poller};
use crate::stream::{Stream, Target};
use crate::task::Handler;
use linewire_protocol::{DEFAULT_MPD_PORT, DEFAULT_NUT_PORT};
use std::cell::RefCell;
use std::future::{poll_fn, Future};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;
use tokio::io::unix::{AsyncFd, AsyncFdReadyGuard};
use tokio::io::{Interest as IoInterest, Ready};
use tokio::sync::oneshot;
use tokio::time::Instant;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<Stream>>>>;

/// The socket a connection watches.
///
/// tokio registers its own duplicate of the fd. The duplicate keeps its
/// number taken until the registration is dropped, so deregistering can
/// never hit a socket opened later under the same number.
struct Watched {
    fd: RawFd,
    interest: Interest,
    /// Duplicate waiting to be registered on the next turn.
    pending: Option<io::Result<OwnedFd>>,
    registered: Option<Rc<AsyncFd<OwnedFd>>>,
}

#[derive(Default)]
struct Registry {
    watched: Option<Watched>,
    deadline: Option<Instant>,
    connect: Option<ConnectFuture>,
}

/// Collaborators for a connection driven by [`Driver`].
#[derive(Clone, Default)]
pub struct TokioReactor {
    inner: Rc<RefCell<Registry>>,
}

impl Poller for TokioReactor {
    fn watch(&mut self, fd: BorrowedFd<'_>, interest: Interest) {
        let mut registry = self.inner.borrow_mut();
        let raw = fd.as_raw_fd();
        if let Some(watched) = registry.watched.as_mut().filter(|w| w.fd == raw) {
            watched.interest = interest;
            return;
        }
        // Replacing drops the old registration
        registry.watched = Some(Watched {
            fd: raw,
            interest,
            pending: Some(fd.try_clone_to_owned()),
            registered: None,
        });
    }

    fn unwatch(&mut self) {
        self.inner.borrow_mut().watched = None;
    }

    fn set_timer(&mut self, after: Duration) {
        self.inner.borrow_mut().deadline = Some(Instant::now() + after);
    }

    fn cancel_timer(&mut self) {
        self.inner.borrow_mut().deadline = None;
    }
}

impl Connector for TokioReactor {
    fn connect(&mut self, host: &str, service: &str) {
        let host = host.to_string();
        let service = service.to_string();
        let future = async move {
            let port = resolve_port(&service)?;
            let stream = tokio::net::TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream.into_std()?))
        };
        self.inner.borrow_mut().connect = Some(Box::pin(future));
    }

    fn cancel(&mut self) {
        self.inner.borrow_mut().connect = None;
    }
}

/// Maps a service to a TCP port: either a number or a well-known name.
pub fn resolve_port(service: &str) -> io::Result<u16> {
    if let Ok(port) = service.parse() {
        return Ok(port);
    }
    match service {
        "mpd" => Ok(DEFAULT_MPD_PORT),
        "nut" | "ups" => Ok(DEFAULT_NUT_PORT),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown service: {}", service),
        )),
    }
}

/// A pending response that can be awaited through [`Driver::wait`].
#[derive(Debug)]
pub struct Reply<R>(oneshot::Receiver<R>);

/// Creates a task handler that forwards the response to a [`Reply`].
///
/// The reply resolves to [`ClientError::Cancelled`] if the task is
/// dropped by a reset.
pub fn reply_channel<C: 'static, R: 'static>() -> (Handler<C, R>, Reply<R>) {
    let (tx, rx) = oneshot::channel();
    let handler = Box::new(move |_: &mut C, response: R| {
        let _ = tx.send(response);
    });
    (handler, Reply(rx))
}

async fn readiness(
    fd: Option<&AsyncFd<OwnedFd>>,
    interest: IoInterest,
) -> io::Result<AsyncFdReadyGuard<'_, OwnedFd>> {
    match fd {
        Some(fd) => fd.ready(interest).await,
        None => std::future::pending().await,
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn connection(reactor: &TokioReactor) -> impl Future<Output = io::Result<Stream>> + '_ {
    poll_fn(move |cx| {
        let mut registry = reactor.inner.borrow_mut();
        let Some(future) = registry.connect.as_mut() else {
            return Poll::Pending;
        };
        match future.as_mut().poll(cx) {
            Poll::Ready(result) => {
                registry.connect = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    })
}

/// Runs a connection on the current tokio runtime.
pub struct Driver<P: Protocol> {
    client: Connection<P>,
    reactor: TokioReactor,
}

impl<P: Protocol> Driver<P> {
    pub fn new() -> Self {
        let reactor = TokioReactor::default();
        let client = Connection::new(Box::new(reactor.clone()), Box::new(reactor.clone()));
        Self { client, reactor }
    }

    pub fn client(&self) -> &Connection<P> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Connection<P> {
        &mut self.client
    }

    pub fn connect(&mut self, target: &Target) -> Result<(), ClientError> {
        self.client.connect(target)
    }

    /// Registers a newly watched socket with tokio and returns the
    /// registration to wait on.
    fn registration(&self) -> io::Result<Option<(Rc<AsyncFd<OwnedFd>>, Interest)>> {
        let mut registry = self.reactor.inner.borrow_mut();
        let Some(watched) = registry.watched.as_mut() else {
            return Ok(None);
        };
        if let Some(fd) = watched.pending.take() {
            let fd = AsyncFd::with_interest(fd?, IoInterest::READABLE | IoInterest::WRITABLE)?;
            watched.registered = Some(Rc::new(fd));
        }
        Ok(watched
            .registered
            .clone()
            .map(|fd| (fd, watched.interest)))
    }

    /// Waits for one wakeup (socket readiness, timer expiry or connect
    /// completion) and hands it to the connection.
    ///
    /// Fails with [`ClientError::NotConnected`] when there is nothing to
    /// wait for.
    pub async fn turn(&mut self) -> Result<(), ClientError> {
        let registration = match self.registration() {
            Ok(registration) => registration,
            Err(e) => {
                self.client.fail(ClientError::Io(e));
                return Ok(());
            }
        };
        let (deadline, connecting) = {
            let registry = self.reactor.inner.borrow();
            (registry.deadline, registry.connect.is_some())
        };
        if registration.is_none() && deadline.is_none() && !connecting {
            return Err(ClientError::NotConnected);
        }

        let wanted = match registration.as_ref().map(|(_, interest)| *interest) {
            Some(Interest::ReadWrite) => IoInterest::READABLE | IoInterest::WRITABLE,
            _ => IoInterest::READABLE,
        };
        let fd = registration.as_ref().map(|(fd, _)| &**fd);
        let Self { client, reactor } = self;
        let reactor = &*reactor;

        tokio::select! {
            guard = readiness(fd, wanted) => match guard {
                Ok(mut guard) => {
                    client.on_ready();
                    // Reads always run until the socket would block
                    guard.clear_ready_matching(Ready::READABLE);
                    if client.wants_write() {
                        guard.clear_ready_matching(Ready::WRITABLE);
                    }
                }
                Err(e) => client.fail(ClientError::Io(e)),
            },
            _ = expiry(deadline) => {
                reactor.inner.borrow_mut().deadline = None;
                client.on_timer();
            }
            result = connection(reactor) => {
                client.on_connect_result(result);
            }
        }
        Ok(())
    }

    /// Runs until the connection has a notification.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            if let Some(event) = self.client.poll_event() {
                return Ok(event);
            }
            self.turn().await?;
        }
    }

    /// Runs until the pending connection attempt settles.
    pub async fn wait_connected(&mut self) -> Result<(), ClientError> {
        loop {
            match self.next_event().await? {
                ClientEvent::Connected => return Ok(()),
                ClientEvent::Failed(e) => return Err(e),
                ClientEvent::Idle(_) => {}
            }
        }
    }

    /// Runs until `reply` resolves.
    ///
    /// Notifications produced meanwhile stay queued for
    /// [`next_event`](Self::next_event).
    pub async fn wait(&mut self, mut reply: Reply<P::Response>) -> Result<P::Response, ClientError> {
        loop {
            match reply.0.try_recv() {
                Ok(response) => return Ok(response),
                Err(oneshot::error::TryRecvError::Closed) => return Err(ClientError::Cancelled),
                Err(oneshot::error::TryRecvError::Empty) => self.turn().await?,
            }
        }
    }

    /// Sends a command and waits for its response.
    pub async fn request<S: AsRef<str>>(&mut self, args: &[S]) -> Result<P::Response, ClientError> {
        let (handler, reply) = reply_channel();
        self.client.command(args, handler)?;
        self.wait(reply).await
    }
}

impl<P: Protocol> Default for Driver<P> {
    fn default() -> Self {
        Self::new()
    }
}
