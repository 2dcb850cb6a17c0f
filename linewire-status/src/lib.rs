//! # linewire-status
//!
//! Status daemon built on the linewire client engine.
//!
//! This crate provides:
//! - YAML + environment configuration
//! - An MPD watcher showing the current song, kept up to date through idle
//! - A NUT poller summarizing UPS state
//! - Reconnection with exponential backoff

pub mod app;
pub mod config;
pub mod error;
pub mod mpd;
pub mod nut;
pub mod reconnect;
pub mod status;

pub use app::{run_from_env, run_until};
pub use config::{Config, ConfigError, MpdConfig, NutConfig, ReconnectConfig};
pub use error::StatusError;
pub use mpd::MpdWatcher;
pub use nut::NutPoller;
pub use reconnect::Backoff;
pub use status::{SharedStatus, StatusBoard};
