//! linewire-cli - Command-line client for MPD and NUT
//!
//! Provides one-shot commands, an idle watcher and a REPL.

mod commands;
mod repl;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use linewire_client::Target;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linewire-cli")]
#[command(about = "Command-line client for MPD and NUT servers")]
#[command(version)]
struct Cli {
    /// Print responses as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// MPD connection options.
#[derive(Args, Clone)]
pub struct MpdArgs {
    /// Server host name or socket path
    #[arg(long, env = "MPD_HOST", default_value = "localhost")]
    pub host: String,

    /// Server port or service name
    #[arg(long, env = "MPD_PORT", default_value = "6600")]
    pub port: String,

    /// Password sent right after connecting
    #[arg(long, env = "MPD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl MpdArgs {
    pub fn target(&self) -> Target {
        Target::parse(&self.host, &self.port)
    }
}

/// NUT connection options.
#[derive(Args, Clone)]
pub struct NutArgs {
    /// Server host name
    #[arg(long, env = "NUT_HOST", default_value = "localhost")]
    pub host: String,

    /// Server port or service name
    #[arg(long, env = "NUT_PORT", default_value = "3493")]
    pub port: String,
}

impl NutArgs {
    pub fn target(&self) -> Target {
        Target::tcp(&self.host, &self.port)
    }
}

#[derive(Subcommand)]
pub enum Session {
    /// Talk to an MPD server
    Mpd(MpdArgs),
    /// Talk to a NUT server
    Nut(NutArgs),
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command to MPD
    Mpd {
        #[command(flatten)]
        conn: MpdArgs,

        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Print MPD change notifications until interrupted
    Idle {
        #[command(flatten)]
        conn: MpdArgs,

        /// Subsystems to watch (all if omitted)
        #[arg(value_delimiter = ',')]
        subsystems: Vec<String>,
    },

    /// Send one command to NUT
    Nut {
        #[command(flatten)]
        conn: NutArgs,

        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Start an interactive session
    Repl {
        #[command(subcommand)]
        session: Session,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Mpd { conn, args } => commands::mpd_command(&conn, &args, cli.json).await,
        Commands::Idle { conn, subsystems } => commands::watch_idle(&conn, &subsystems).await,
        Commands::Nut { conn, args } => commands::nut_command(&conn, &args, cli.json).await,
        Commands::Repl { session } => repl::run(session, cli.json).await,
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
