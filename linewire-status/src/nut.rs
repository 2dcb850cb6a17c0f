//! NUT UPS poller.
//!
//! Every interval the poller opens a fresh connection, lists the UPS
//! units, fetches the variables of each and logs out. A poll that has not
//! finished by the next tick is abandoned and reported as a failure, so
//! the interval doubles as the response timeout.

use crate::config::NutConfig;
use crate::status::SharedStatus;
use linewire_client::{ClientEvent, ConnectionState, Driver, Nut, NutClient};
use linewire_protocol::nut::Response;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::rc::Rc;
use tokio::time::{Interval, MissedTickBehavior};

const FAILURE_TEXT: &str = "NUT failure";

/// Variables of one UPS, by name.
pub type UpsVars = BTreeMap<String, String>;

fn describe_flag(flag: &str) -> Option<&'static str> {
    Some(match flag {
        "OL" => "on-line",
        "OB" => "on battery",
        "LB" => "low battery",
        "RB" => "replace battery",
        "CHRG" => "charging",
        "DISCHRG" => "discharging",
        "OVER" => "overload",
        "OFF" => "off",
        "TRIM" => "voltage trim",
        "BOOST" => "voltage boost",
        "BYPASS" => "bypass",
        _ => return None,
    })
}

/// Formats seconds as `h:mm:ss`.
pub fn format_runtime(seconds: u64) -> String {
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}

/// Summarizes one UPS, or returns `None` if it lacks the status, charge
/// or runtime variables.
pub fn format_ups(vars: &UpsVars, config: &NutConfig) -> Option<String> {
    let status = vars.get("ups.status")?;
    let charge = vars.get("battery.charge")?;
    let runtime: u64 = vars.get("battery.runtime")?.parse().ok()?;

    let mut items: Vec<String> = Vec::new();
    let mut on_battery = false;
    for flag in status.split_whitespace() {
        items.extend(describe_flag(flag).map(str::to_string));
        on_battery |= flag == "OB";
    }

    if on_battery || charge != "100" {
        items.push(format!("{}%", charge));
    }
    if on_battery {
        items.push(format_runtime(runtime));
    }

    let load = vars.get("ups.load").and_then(|l| l.parse::<u64>().ok());
    if let Some(load) = load.filter(|&l| l >= config.load_threshold) {
        let mut item = format!("load {}%", load);
        let nominal = vars
            .get("ups.realpower.nominal")
            .and_then(|p| p.parse::<u64>().ok())
            .or(config.load_power);
        if let Some(watts) = nominal.and_then(|power| power.checked_mul(load)) {
            let _ = write!(item, " (~{}W)", watts / 100);
        }
        items.push(item);
    }

    Some(format!("UPS: {}", items.join("; ")))
}

/// State reachable from task handlers.
#[derive(Clone)]
struct Shared {
    status: SharedStatus,
    config: Rc<NutConfig>,
    ups: Rc<RefCell<BTreeMap<String, UpsVars>>>,
    /// Set once the current poll has completed.
    success: Rc<Cell<bool>>,
}

impl Shared {
    fn indicate_failure(&self) {
        self.status
            .borrow_mut()
            .set_ups(Some(FAILURE_TEXT.to_string()));
    }
}

/// Keeps the NUT part of the status line current.
pub struct NutPoller {
    driver: Driver<Nut>,
    shared: Shared,
    ticker: Interval,
}

impl NutPoller {
    /// Creates the poller; the first poll starts on the first step.
    pub fn new(config: NutConfig, status: SharedStatus) -> Self {
        let mut ticker = tokio::time::interval(config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            driver: Driver::new(),
            shared: Shared {
                status,
                config: Rc::new(config),
                ups: Rc::new(RefCell::new(BTreeMap::new())),
                success: Rc::new(Cell::new(false)),
            },
            ticker,
        }
    }

    pub fn client(&self) -> &NutClient {
        self.driver.client()
    }

    /// Handles queued notifications, then waits for the next tick or
    /// connection wakeup. Safe to cancel.
    pub async fn step(&mut self) {
        while let Some(event) = self.driver.client_mut().poll_event() {
            self.on_event(event);
        }

        let active = self.driver.client().state() != ConnectionState::Disconnected;
        tokio::select! {
            _ = self.ticker.tick() => self.on_tick(),
            result = self.driver.turn(), if active => {
                if let Err(e) = result {
                    tracing::debug!("NUT poller idle: {}", e);
                }
            }
        }
    }

    fn on_tick(&mut self) {
        if self.driver.client().state() != ConnectionState::Disconnected {
            tracing::error!("Failed to retrieve NUT status within the interval");
            self.shared.indicate_failure();
            self.driver.client_mut().reset();
        }

        self.shared.ups.borrow_mut().clear();
        self.shared.success.set(false);

        let target = self.shared.config.target();
        tracing::debug!("Polling NUT at {}", target);
        if let Err(e) = self.driver.connect(&target) {
            tracing::error!("Cannot connect to NUT: {}", e);
            self.shared.indicate_failure();
        }
    }

    fn on_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected => {
                let shared = self.shared.clone();
                let result = self
                    .driver
                    .client_mut()
                    .list_ups(move |conn: &mut NutClient, response| {
                        on_ups_list(conn, response, &shared)
                    });
                if let Err(e) = result {
                    tracing::warn!("NUT request failed: {}", e);
                }
            }
            // Also reported for the hang-up that follows LOGOUT
            ClientEvent::Failed(e) => {
                if !self.shared.success.get() {
                    tracing::error!("Connection to NUT failed: {}", e);
                    self.shared.indicate_failure();
                }
            }
            ClientEvent::Idle(_) => {}
        }
    }
}

fn check(response: &Response) -> bool {
    match &response.error {
        None => true,
        Some(id) => {
            tracing::error!("Retrieving NUT info failed: {}", id);
            false
        }
    }
}

fn on_ups_list(conn: &mut NutClient, response: Response, shared: &Shared) {
    if !check(&response) {
        return;
    }

    for name in response.ups_names() {
        let shared = shared.clone();
        let result = conn.list_vars(name, move |_: &mut NutClient, response| {
            on_vars(response, &shared)
        });
        if let Err(e) = result {
            tracing::warn!("NUT request failed: {}", e);
            return;
        }
    }

    let shared = shared.clone();
    let result = conn.command(&["LOGOUT"], move |_: &mut NutClient, response| {
        on_logout(response, &shared)
    });
    if let Err(e) = result {
        tracing::warn!("NUT request failed: {}", e);
    }
}

fn on_vars(response: Response, shared: &Shared) {
    if !check(&response) {
        return;
    }

    let mut ups = shared.ups.borrow_mut();
    for record in response.records("VAR").filter(|r| r.len() >= 3) {
        ups.entry(record[0].clone())
            .or_default()
            .insert(record[1].clone(), record[2].clone());
    }
}

fn on_logout(response: Response, shared: &Shared) {
    if !check(&response) {
        return;
    }

    let lines: Vec<String> = shared
        .ups
        .borrow()
        .iter()
        .filter_map(|(name, vars)| {
            let line = format_ups(vars, &shared.config);
            if line.is_none() {
                tracing::debug!("UPS {} is missing status variables", name);
            }
            line
        })
        .collect();

    let text = (!lines.is_empty()).then(|| lines.join("   "));
    shared.status.borrow_mut().set_ups(text);
    shared.success.set(true);
}
