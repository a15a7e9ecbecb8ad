use anyhow::Context;
use blind_control::{
    blinds::{BlindsApi, BlindsClient, CommandKind},
    configuration::{get_configuration, AppConfig},
    display::{render_state, telemetry_table},
    logging::setup_tracing,
    session::{ControlSession, SessionOptions},
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::*;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to a settings file, defaults to configuration/settings
    #[clap(long)]
    config: Option<PathBuf>,
    /// Overrides blinds_service.base_url
    #[clap(long)]
    base_url: Option<String>,
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[clap(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Keep polling and accept commands from stdin
    Watch,
    /// Fetch telemetry once and print it
    Status,
    /// Send one command and exit
    Send { command: CommandKind },
}

#[derive(Debug, PartialEq, Eq)]
enum UserInput {
    Command(CommandKind),
    Toggle,
    Refresh,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> UserInput {
    match line.trim().to_lowercase().as_str() {
        "" => UserInput::Empty,
        "toggle" => UserInput::Toggle,
        "refresh" => UserInput::Refresh,
        "status" => UserInput::Status,
        "help" | "?" => UserInput::Help,
        "quit" | "exit" => UserInput::Quit,
        other => other
            .parse()
            .map(UserInput::Command)
            .unwrap_or_else(|_| UserInput::Unknown(other.to_owned())),
    }
}

const HELP: &str = "commands: open, close, auto, manual, toggle, refresh, status, quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone();
    let app_config = get_configuration(args.config, args.base_url)
        .context("Failed to load configuration")?;
    setup_tracing(args.verbose, app_config.logging.json);

    match config_path {
        Some(path) => info!("Using configuration from {:?}", path),
        None => info!("Using default configuration"),
    }
    let client = BlindsClient::new(&app_config.blinds_service.base_url)?;
    info!("Using blind service at {}", client.base_url());

    match args.action.unwrap_or(Action::Watch) {
        Action::Watch => watch(client, &app_config).await,
        Action::Status => {
            let records = client.fetch_telemetry().await?;
            print!("{}", telemetry_table(&records));
            Ok(())
        }
        Action::Send { command } => {
            let ack = client.send_command(command).await?;
            println!("{} command accepted ({})", command, ack.status);
            Ok(())
        }
    }
}

async fn watch(client: BlindsClient, app_config: &AppConfig) -> anyhow::Result<()> {
    let session = Arc::new(ControlSession::start(
        Arc::new(client),
        SessionOptions::from(&app_config.polling),
    ));
    let mut updates = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                println!("{}", render_state(&state));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    break;
                };
                match parse_input(&line) {
                    UserInput::Command(command) => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            session.command(command).await;
                        });
                    }
                    UserInput::Toggle => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            session.toggle_mode().await;
                        });
                    }
                    UserInput::Refresh => {
                        let session = session.clone();
                        tokio::spawn(async move { session.refresh().await });
                    }
                    UserInput::Status => println!("{}", render_state(&session.state())),
                    UserInput::Help => println!("{}", HELP),
                    UserInput::Quit => break,
                    UserInput::Empty => (),
                    UserInput::Unknown(input) => println!("Unknown command {:?}. {}", input, HELP),
                }
            }
        }
    }

    session.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_inputs() {
        assert_eq!(parse_input("open"), UserInput::Command(CommandKind::Open));
        assert_eq!(parse_input(" Manual \n"), UserInput::Command(CommandKind::Manual));
        assert_eq!(parse_input("toggle"), UserInput::Toggle);
        assert_eq!(parse_input("refresh"), UserInput::Refresh);
        assert_eq!(parse_input("exit"), UserInput::Quit);
        assert_eq!(parse_input("   "), UserInput::Empty);
        assert_eq!(
            parse_input("half-open"),
            UserInput::Unknown("half-open".to_owned())
        );
    }

    #[test]
    fn cli_accepts_send_with_known_command() {
        let args = Args::try_parse_from(["blind_control", "-vv", "send", "close"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(matches!(
            args.action,
            Some(Action::Send {
                command: CommandKind::Close
            })
        ));

        assert!(Args::try_parse_from(["blind_control", "send", "sideways"]).is_err());
    }
}
