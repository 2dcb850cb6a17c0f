//! MPD client: command lists and idle mode with keep-alive.
//!
//! While idling, the server holds back any answer until something
//! changes, and it only accepts `noidle`. Sending any command through
//! [`Connection::send_command`] therefore injects `noidle` first.

use crate::connection::{ClientEvent, Connection, Protocol};
use crate::error::ClientError;
use crate::task::TaskId;
use linewire_protocol::mpd::{self, SubsystemMask};
use linewire_protocol::{Grammar, MPD_GRAMMAR};
use std::time::Duration;

/// How often an idle connection is woken up to prove it is alive.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// MPD-specific connection state.
#[derive(Debug, Default)]
pub struct MpdState {
    idling: bool,
    subsystems: SubsystemMask,
    in_list: bool,
}

/// The MPD protocol.
#[derive(Debug)]
pub struct Mpd;

pub type MpdClient = Connection<Mpd>;

impl Protocol for Mpd {
    const NAME: &'static str = "MPD";
    const GRAMMAR: Grammar = MPD_GRAMMAR;
    const LOCAL_SOCKETS: bool = true;

    type Decoder = mpd::Decoder;
    type Response = mpd::Response;
    type State = MpdState;

    fn check_task(conn: &MpdClient) -> Result<(), ClientError> {
        // Commands inside a list share the single task of the list
        if conn.ext().in_list {
            return Err(ClientError::BatchOpen);
        }
        Ok(())
    }

    fn before_send(conn: &mut MpdClient) {
        if !conn.ext().idling {
            return;
        }
        conn.cancel_timer();
        let state = conn.ext_mut();
        state.idling = false;
        state.subsystems = SubsystemMask::NONE;
        conn.queue_line(&["noidle"]);
    }

    fn on_timer(conn: &mut MpdClient) {
        if conn.ext().idling {
            conn.keepalive();
        }
    }
}

impl Connection<Mpd> {
    /// Version from the server greeting, once received.
    pub fn server_version(&self) -> Option<&str> {
        self.decoder().server_version()
    }

    pub fn is_idling(&self) -> bool {
        self.ext().idling
    }

    /// Subsystems of the current idle, empty meaning all.
    pub fn idle_subsystems(&self) -> SubsystemMask {
        self.ext().subsystems
    }

    pub fn in_list(&self) -> bool {
        self.ext().in_list
    }

    /// Opens a command list. Commands sent until [`list_end`] are
    /// answered by one response.
    ///
    /// [`list_end`]: Self::list_end
    pub fn list_begin(&mut self) -> Result<(), ClientError> {
        if self.ext().in_list {
            return Err(ClientError::BatchOpen);
        }
        self.send_command(&["command_list_begin"])?;
        self.ext_mut().in_list = true;
        Ok(())
    }

    /// Closes the command list. Register the task for it afterwards.
    pub fn list_end(&mut self) -> Result<(), ClientError> {
        if !self.ext().in_list {
            return Err(ClientError::NoBatch);
        }
        self.send_command(&["command_list_end"])?;
        self.ext_mut().in_list = false;
        Ok(())
    }

    /// Sends `commands` as one list and registers `handler` for its
    /// response.
    pub fn send_batch<I, C, S, F>(&mut self, commands: I, handler: F) -> Result<TaskId, ClientError>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[S]>,
        S: AsRef<str>,
        F: FnOnce(&mut Self, mpd::Response) + 'static,
    {
        self.list_begin()?;
        for command in commands {
            self.send_command(command.as_ref())?;
        }
        self.list_end()?;
        self.add_task(handler)
    }

    /// Authenticates with a plaintext password.
    pub fn password<F>(&mut self, secret: &str, handler: F) -> Result<TaskId, ClientError>
    where
        F: FnOnce(&mut Self, mpd::Response) + 'static,
    {
        self.command(&["password", secret], handler)
    }

    /// Enters idle mode, waiting for changes in `subsystems` (all of them
    /// when empty).
    ///
    /// Changes are reported as [`ClientEvent::Idle`]. Idling stays on
    /// after a report; the next command interrupts it, or call `idle`
    /// again to keep waiting.
    pub fn idle(&mut self, subsystems: SubsystemMask) -> Result<(), ClientError> {
        if self.ext().in_list {
            return Err(ClientError::BatchOpen);
        }

        let mut args = vec!["idle"];
        args.extend(subsystems.iter().map(|s| s.name()));
        self.send_command(&args)?;
        self.set_timer(KEEPALIVE_INTERVAL);
        self.add_task(on_idle_return)?;

        let state = self.ext_mut();
        state.idling = true;
        state.subsystems = subsystems;
        Ok(())
    }

    /// Pings the server and resumes the interrupted idle.
    fn keepalive(&mut self) {
        tracing::debug!("MPD: idle keep-alive");
        if let Err(e) = self.ping_and_idle(self.ext().subsystems) {
            tracing::warn!("MPD: keep-alive failed: {}", e);
        }
    }

    fn ping_and_idle(&mut self, subsystems: SubsystemMask) -> Result<(), ClientError> {
        // Over TCP, a dead peer only shows up once something is written
        self.send_command(&["ping"])?;
        self.add_silent_task()?;
        self.idle(subsystems)
    }
}

fn on_idle_return(conn: &mut MpdClient, response: mpd::Response) {
    let (changed, unknown) = response.changed();
    for line in unknown {
        tracing::debug!("MPD: unexpected idle output: {}", line);
    }

    if !changed.is_empty() {
        conn.push_event(ClientEvent::Idle(changed));
    }
}
