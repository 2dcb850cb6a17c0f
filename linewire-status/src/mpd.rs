//! MPD now-playing watcher.
//!
//! After connecting (and authenticating, if configured) the watcher asks
//! for the current song and player status in one command list, then
//! idles. Player or playlist changes repeat the request; anything else
//! just resumes idling.

use crate::config::MpdConfig;
use crate::reconnect::Backoff;
use crate::status::SharedStatus;
use linewire_client::{ClientError, ClientEvent, Driver, Mpd, MpdClient};
use linewire_protocol::mpd::{self, Subsystem, SubsystemMask};
use std::cell::Cell;
use std::fmt::Write;
use std::rc::Rc;
use tokio::time::Instant;

/// Formats the current song from a `currentsong` + `status` answer.
///
/// Returns `None` while playback is stopped.
pub fn song_line(response: &mpd::Response) -> Option<String> {
    let mut line = String::new();
    match response.get("state") {
        Some("stop") => return None,
        Some("pause") => line.push_str("▯▯ "),
        Some(_) => line.push_str("▷ "),
        None => {}
    }

    let title = response
        .get("title")
        .or_else(|| response.get("name"))
        .or_else(|| response.get("file"));
    if let Some(title) = title {
        line.push_str(title);
    }
    if let Some(artist) = response.get("artist") {
        let _ = write!(line, " by {}", artist);
    }
    if let Some(album) = response.get("album") {
        let _ = write!(line, " from {}", album);
    }
    Some(line)
}

/// State reachable from task handlers.
#[derive(Clone)]
struct Shared {
    status: SharedStatus,
    /// Set once the server answered a request on this connection.
    exchanged: Rc<Cell<bool>>,
}

/// Keeps the MPD part of the status line current.
pub struct MpdWatcher {
    config: MpdConfig,
    driver: Driver<Mpd>,
    shared: Shared,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl MpdWatcher {
    pub fn new(config: MpdConfig, status: SharedStatus) -> Self {
        let backoff = Backoff::from_config(&config.reconnect);
        Self {
            config,
            driver: Driver::new(),
            shared: Shared {
                status,
                exchanged: Rc::new(Cell::new(false)),
            },
            backoff,
            retry_at: None,
        }
    }

    pub fn client(&self) -> &MpdClient {
        self.driver.client()
    }

    /// Returns true while waiting to reconnect.
    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }

    /// Starts the first connection attempt.
    pub fn start(&mut self) {
        self.connect();
    }

    fn connect(&mut self) {
        let target = self.config.target();
        tracing::debug!("Connecting to MPD at {}", target);
        if let Err(e) = self.driver.connect(&target) {
            tracing::error!("Cannot connect to MPD: {}", e);
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.shared.exchanged.take() {
            self.backoff.reset();
        }
        let delay = self.backoff.next_delay();
        tracing::info!("Reconnecting to MPD in {:?}", delay);
        self.retry_at = Some(Instant::now() + delay);
    }

    /// Waits for and handles one thing: a reconnect deadline or a client
    /// notification. Safe to cancel.
    pub async fn step(&mut self) {
        if let Some(at) = self.retry_at {
            tokio::time::sleep_until(at).await;
            self.retry_at = None;
            self.connect();
            return;
        }

        match self.driver.next_event().await {
            Ok(event) => self.on_event(event),
            Err(e) => {
                tracing::warn!("MPD watcher has nothing to wait for: {}", e);
                self.schedule_reconnect();
            }
        }
    }

    fn on_event(&mut self, event: ClientEvent) {
        let result = match event {
            ClientEvent::Connected => {
                tracing::info!(
                    "Connected to MPD at {}",
                    self.driver.client().peer().unwrap_or("?")
                );
                on_connected(
                    self.driver.client_mut(),
                    self.config.password.as_deref(),
                    &self.shared,
                )
            }
            ClientEvent::Idle(changed) => {
                tracing::debug!("MPD changed: {}", changed);
                on_changed(self.driver.client_mut(), changed, &self.shared)
            }
            ClientEvent::Failed(e) => {
                tracing::error!("Connection to MPD failed: {}", e);
                self.shared.status.borrow_mut().set_song(None);
                self.schedule_reconnect();
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!("MPD request failed: {}", e);
            self.driver.client_mut().disconnect();
        }
    }
}

fn on_connected(
    conn: &mut MpdClient,
    password: Option<&str>,
    shared: &Shared,
) -> Result<(), ClientError> {
    match password {
        Some(secret) => {
            let shared = shared.clone();
            conn.password(secret, move |conn: &mut MpdClient, response| {
                on_password(conn, response, &shared)
            })?;
            Ok(())
        }
        None => request_info(conn, shared),
    }
}

fn on_password(conn: &mut MpdClient, response: mpd::Response, shared: &Shared) {
    let result = match &response.error {
        None => request_info(conn, shared),
        Some(ack) => {
            tracing::error!("Couldn't authenticate to MPD: {}", ack.message);
            // The server hangs up, and the failure path reconnects
            conn.send_command(&["close"])
        }
    };
    if let Err(e) = result {
        tracing::warn!("MPD request failed: {}", e);
    }
}

fn on_changed(
    conn: &mut MpdClient,
    changed: SubsystemMask,
    shared: &Shared,
) -> Result<(), ClientError> {
    let relevant = SubsystemMask::from(Subsystem::Player).with(Subsystem::Playlist);
    if changed.intersects(relevant) {
        request_info(conn, shared)
    } else {
        conn.idle(SubsystemMask::NONE)
    }
}

fn request_info(conn: &mut MpdClient, shared: &Shared) -> Result<(), ClientError> {
    let shared = shared.clone();
    conn.send_batch(
        [["currentsong"], ["status"]],
        move |_: &mut MpdClient, response| on_info(response, &shared),
    )?;
    conn.idle(SubsystemMask::NONE)
}

fn on_info(response: mpd::Response, shared: &Shared) {
    if let Some(ack) = &response.error {
        tracing::debug!("Retrieving MPD info failed: {}", ack);
        return;
    }
    shared.exchanged.set(true);
    shared.status.borrow_mut().set_song(song_line(&response));
}
