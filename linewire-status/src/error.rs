//! Daemon error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nothing to watch: both MPD and NUT are disabled")]
    NothingEnabled,
}
