//! Command execution.

use crate::{MpdArgs, NutArgs};
use colored::Colorize;
use linewire_client::{ClientError, ClientEvent, Driver, Mpd, Nut};
use linewire_protocol::mpd::{self, parse_kv, Ack, Subsystem, SubsystemMask};
use linewire_protocol::{nut, NUT_GRAMMAR};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Connects to MPD and authenticates if a password is configured.
pub async fn connect_mpd(args: &MpdArgs) -> Result<Driver<Mpd>, ClientError> {
    let mut driver: Driver<Mpd> = Driver::new();
    driver.connect(&args.target())?;
    driver.wait_connected().await?;

    if let Some(password) = &args.password {
        let response = driver.request(&["password", password.as_str()]).await?;
        if let Some(ack) = &response.error {
            return Err(ClientError::Server(describe_ack(ack)));
        }
    }
    Ok(driver)
}

pub async fn connect_nut(args: &NutArgs) -> Result<Driver<Nut>, ClientError> {
    let mut driver = Driver::new();
    driver.connect(&args.target())?;
    driver.wait_connected().await?;
    Ok(driver)
}

/// Formats an ACK, naming the error kind when the code is a known one.
fn describe_ack(ack: &Ack) -> String {
    match ack.kind() {
        Some(kind) => format!("{} ({})", ack, kind),
        None => ack.to_string(),
    }
}

pub fn format_mpd(response: &mpd::Response, json: bool) -> CliResult<String> {
    if json {
        return Ok(serde_json::to_string_pretty(response)?);
    }
    if let Some(ack) = &response.error {
        return Err(ClientError::Server(describe_ack(ack)).into());
    }
    if response.data.is_empty() {
        return Ok("OK".green().to_string());
    }

    let lines: Vec<String> = response
        .data
        .iter()
        .map(|line| match parse_kv(line) {
            Some((key, value)) => format!("{}: {}", key.cyan(), value),
            None => line.clone(),
        })
        .collect();
    Ok(lines.join("\n"))
}

pub fn format_nut(response: &nut::Response, json: bool) -> CliResult<String> {
    if json {
        return Ok(serde_json::to_string_pretty(response)?);
    }
    if let Some(id) = &response.error {
        return Err(ClientError::Server(id.clone()).into());
    }

    let lines: Vec<String> = response
        .data
        .iter()
        .map(|record| NUT_GRAMMAR.serialize(record))
        .collect();
    Ok(lines.join("\n"))
}

/// Parses subsystem names into a mask.
pub fn parse_subsystems(names: &[String]) -> Result<SubsystemMask, String> {
    names
        .iter()
        .map(|name| {
            Subsystem::from_name(name.trim()).ok_or_else(|| format!("unknown subsystem: {}", name))
        })
        .collect()
}

pub async fn mpd_command(args: &MpdArgs, command: &[String], json: bool) -> CliResult<String> {
    let mut driver = connect_mpd(args).await?;
    let response = driver.request(command).await?;
    format_mpd(&response, json)
}

pub async fn nut_command(args: &NutArgs, command: &[String], json: bool) -> CliResult<String> {
    let mut driver = connect_nut(args).await?;
    let response = driver.request(command).await?;
    format_nut(&response, json)
}

/// Idles until interrupted, printing each batch of changes.
pub async fn watch_idle(args: &MpdArgs, names: &[String]) -> CliResult<String> {
    let subsystems = parse_subsystems(names)?;
    let mut driver = connect_mpd(args).await?;

    let watched = if subsystems.is_empty() {
        "all subsystems".to_string()
    } else {
        subsystems.to_string()
    };
    eprintln!("{} {}", "Watching".green(), watched.cyan());
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        driver.client_mut().idle(subsystems)?;
        tokio::select! {
            event = driver.next_event() => match event? {
                ClientEvent::Idle(changed) => println!("{}", changed),
                ClientEvent::Failed(e) => return Err(e.into()),
                ClientEvent::Connected => {}
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }
    Ok(String::new())
}
