//! # linewire-client
//!
//! Non-blocking, pipelined client engine for line-oriented text protocols.
//!
//! This crate provides:
//! - Partial read/write helpers over non-blocking sockets
//! - A FIFO task queue matching responses to requests in order
//! - A generic connection state machine, instantiated for MPD and NUT
//! - MPD idle mode with transparent interruption and keep-alive
//! - A tokio-backed driver implementing the readiness and connect seams

pub mod connection;
pub mod error;
pub mod io;
pub mod mpd;
pub mod nut;
pub mod reactor;
pub mod runtime;
pub mod stream;
pub mod task;

#[cfg(test)]
mod testing;

pub use connection::{ClientEvent, Connection, ConnectionState, Protocol};
pub use error::ClientError;
pub use mpd::{Mpd, MpdClient};
pub use nut::{Nut, NutClient};
pub use reactor::{Connector, Interest, Poller};
pub use runtime::{reply_channel, Driver, Reply, TokioReactor};
pub use stream::{Stream, Target};
pub use task::{TaskId, TaskQueue};
