//! NUT client.
//!
//! The protocol has no server push and no session state beyond the
//! socket, so the connection only needs the grammar and a few request
//! helpers.

use crate::connection::{Connection, Protocol};
use crate::error::ClientError;
use crate::task::TaskId;
use linewire_protocol::nut::{self, Response};
use linewire_protocol::{Grammar, NUT_GRAMMAR};

/// The NUT protocol.
#[derive(Debug)]
pub struct Nut;

pub type NutClient = Connection<Nut>;

impl Protocol for Nut {
    const NAME: &'static str = "NUT";
    const GRAMMAR: Grammar = NUT_GRAMMAR;
    const LOCAL_SOCKETS: bool = false;

    type Decoder = nut::Decoder;
    type Response = Response;
    type State = ();
}

impl Connection<Nut> {
    /// Requests the names of all UPS units (`LIST UPS`).
    pub fn list_ups<F>(&mut self, handler: F) -> Result<TaskId, ClientError>
    where
        F: FnOnce(&mut Self, Response) + 'static,
    {
        self.command(&["LIST", "UPS"], handler)
    }

    /// Requests all variables of one UPS (`LIST VAR <ups>`).
    pub fn list_vars<F>(&mut self, ups: &str, handler: F) -> Result<TaskId, ClientError>
    where
        F: FnOnce(&mut Self, Response) + 'static,
    {
        self.command(&["LIST", "VAR", ups], handler)
    }

    /// Ends the session. The server closes the socket after answering.
    pub fn logout(&mut self) -> Result<TaskId, ClientError> {
        self.command(&["LOGOUT"], |_: &mut Self, _| {})
    }
}
