//! linewire - MPD and NUT status daemon
//!
//! Prints a status line with the current song and UPS state whenever it
//! changes.

use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = linewire_status::run_from_env().await {
        tracing::error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
