//! dronelink-cli - Command-line interface for dronelink
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dronelink_client::{ConnectionConfig, DroneClient};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dronelink-cli")]
#[command(about = "Command-line interface for the dronelink coordinator")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(short, long, env = "DRONELINK_URL", default_value = "ws://127.0.0.1:8765")]
    server: String,

    /// Drone identity to log in as
    #[arg(short, long, env = "DRONELINK_IDENTITY", default_value = "drone1")]
    identity: String,

    /// Drone secret
    #[arg(short = 'p', long, env = "DRONELINK_SECRET")]
    secret: Option<String>,

    /// Seconds to wait for each reply
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Log in and print the issued credential
    Login,

    /// Log in and send one or more commands in order
    Send {
        /// Command names (takeoff, land, patrol, capture_photo, record_video)
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List the commands the coordinator knows
    List,

    /// Generate SHA-256 hash of a drone secret for config files
    HashSecret {
        /// The secret to hash
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Local commands (no coordinator connection needed)
    match &cli.command {
        Some(Commands::HashSecret { secret }) => {
            println!("{}", commands::hash_secret(secret));
            return Ok(());
        }
        Some(Commands::List) => {
            println!("{}", commands::list_commands());
            return Ok(());
        }
        _ => {}
    }

    let Some(secret) = cli.secret.clone() else {
        eprintln!(
            "{}: a secret is required (--secret or DRONELINK_SECRET)",
            "Error".red()
        );
        std::process::exit(1);
    };

    let config = ConnectionConfig::new(cli.server.clone())
        .with_request_timeout(Duration::from_secs(cli.timeout));
    let mut client = DroneClient::new(config);

    client.open().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, &cli.server, &cli.identity, &secret).await?;
        }
        Some(cmd) => {
            let result = commands::execute(&mut client, &cli.identity, &secret, cmd).await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = client.close().await;
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}
