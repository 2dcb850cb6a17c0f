//! Daemon main loop.

use crate::config::Config;
use crate::error::StatusError;
use crate::mpd::MpdWatcher;
use crate::nut::NutPoller;
use crate::status::{SharedStatus, StatusBoard};
use std::future::Future;

async fn step_mpd(watcher: &mut Option<MpdWatcher>) {
    match watcher {
        Some(watcher) => watcher.step().await,
        None => std::future::pending().await,
    }
}

async fn step_nut(poller: &mut Option<NutPoller>) {
    match poller {
        Some(poller) => poller.step().await,
        None => std::future::pending().await,
    }
}

fn publish(status: &SharedStatus) {
    let mut board = status.borrow_mut();
    if board.take_dirty() {
        println!("{}", board.render());
    }
}

/// Loads the configuration and runs until Ctrl+C.
pub async fn run_from_env() -> Result<(), StatusError> {
    let config = Config::load()?;

    tracing::info!("Starting linewire status daemon");
    if config.mpd.enabled {
        tracing::info!("  MPD: {}", config.mpd.target());
    } else {
        tracing::info!("  MPD: disabled");
    }
    if config.nut.enabled {
        tracing::info!(
            "  NUT: {} every {}s",
            config.nut.target(),
            config.nut.interval_secs
        );
    } else {
        tracing::info!("  NUT: disabled");
    }

    run_until(config, tokio::signal::ctrl_c()).await
}

/// Runs the enabled watchers, printing the status line whenever it
/// changes, until `shutdown` resolves.
pub async fn run_until<F>(config: Config, shutdown: F) -> Result<(), StatusError>
where
    F: Future<Output = std::io::Result<()>>,
{
    if !config.mpd.enabled && !config.nut.enabled {
        return Err(StatusError::NothingEnabled);
    }

    let status = StatusBoard::shared();
    let mut mpd = config
        .mpd
        .enabled
        .then(|| MpdWatcher::new(config.mpd.clone(), status.clone()));
    let mut nut = config
        .nut
        .enabled
        .then(|| NutPoller::new(config.nut.clone(), status.clone()));

    if let Some(watcher) = mpd.as_mut() {
        watcher.start();
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = step_mpd(&mut mpd) => {}
            _ = step_nut(&mut nut) => {}
            result = &mut shutdown => {
                result?;
                tracing::info!("Shutting down");
                break;
            }
        }
        publish(&status);
    }

    Ok(())
}
