//! Seams to the event loop that drives a connection.
//!
//! A connection never blocks and never waits by itself. It tells a
//! [`Poller`] which socket events it cares about and when its timer should
//! fire, and asks a [`Connector`] to establish TCP connections. The owner
//! of those collaborators calls back into the connection when something
//! happens: `on_ready`, `on_timer` and `on_connect_result`.

use std::os::fd::BorrowedFd;
use std::time::Duration;

/// Socket events a connection wants to be woken up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    ReadWrite,
}

/// Readiness multiplexer for one connection.
pub trait Poller {
    /// Starts or updates watching `fd`. Replaces any previously watched fd.
    fn watch(&mut self, fd: BorrowedFd<'_>, interest: Interest);

    /// Stops watching the socket. Called while the socket is still open,
    /// so any registration can be released before its fd number is
    /// reused.
    fn unwatch(&mut self);

    /// Arms the one-shot timer, replacing a pending one.
    fn set_timer(&mut self, after: Duration);

    fn cancel_timer(&mut self);
}

/// Resolves a host and service and connects to it in the background.
///
/// The result is delivered through `Connection::on_connect_result`.
pub trait Connector {
    fn connect(&mut self, host: &str, service: &str);

    /// Abandons a pending attempt. Its result must not be delivered.
    fn cancel(&mut self);
}
