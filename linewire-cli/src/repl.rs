//! Interactive REPL.
//!
//! Input lines are split with the grammar of the selected protocol, so
//! quoting works the same way it does on the wire.

use crate::commands::{self, CliResult};
use crate::Session;
use colored::Colorize;
use linewire_client::{Driver, Protocol};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;

const HELP_TEXT: &str = r#"
Any other input is sent to the server as one command.
Arguments containing spaces can be double-quoted.

  help                          Show this help
  quit, exit                    Exit the REPL

MPD examples:
  status
  find artist "Daft Punk"
  idle player                   Blocks until the player changes

NUT examples:
  LIST UPS
  LIST VAR myups
  GET VAR myups battery.charge
"#;

fn history_path() -> PathBuf {
    home::home_dir()
        .map(|h| h.join(".linewire_history"))
        .unwrap_or_else(|| ".linewire_history".into())
}

pub async fn run(session: Session, json: bool) -> CliResult<String> {
    println!("{}", "linewire CLI".bold().cyan());

    match session {
        Session::Mpd(args) => {
            println!("Connecting to {}...", args.target());
            let driver = commands::connect_mpd(&args).await?;
            if let Some(version) = driver.client().server_version() {
                println!("{} (MPD {})", "Connected!".green(), version);
            }
            interact(driver, "mpd>", |r| commands::format_mpd(&r, json)).await
        }
        Session::Nut(args) => {
            println!("Connecting to {}...", args.target());
            let driver = commands::connect_nut(&args).await?;
            println!("{}", "Connected!".green());
            interact(driver, "nut>", |r| commands::format_nut(&r, json)).await
        }
    }
}

async fn interact<P, F>(mut driver: Driver<P>, prompt: &str, format: F) -> CliResult<String>
where
    P: Protocol,
    F: Fn(P::Response) -> CliResult<String>,
{
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let prompt = format!("{} ", prompt.cyan());
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match line.to_lowercase().as_str() {
                    "help" | "?" => {
                        println!("{}", HELP_TEXT);
                        continue;
                    }
                    "quit" | "exit" | "q" => break,
                    _ => {}
                }

                let args = match P::GRAMMAR.tokenize(line) {
                    Ok(args) => args,
                    Err(e) => {
                        println!("{}: {}\n", "Error".red(), e);
                        continue;
                    }
                };

                match driver.request(&args).await {
                    Ok(response) => match format(response) {
                        Ok(output) => println!("{}\n", output),
                        Err(e) => println!("{}: {}\n", "Error".red(), e),
                    },
                    Err(e) => {
                        println!("{}: {}", "Connection lost".red(), e);
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    driver.client_mut().disconnect();
    println!("{}", "Disconnected.".dimmed());

    Ok(String::new())
}
