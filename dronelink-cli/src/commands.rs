//! Command execution.

use crate::Commands;
use colored::Colorize;
use dronelink_client::{ClientError, DroneClient, StatusUpdate};
use dronelink_core::ACTION_TABLE;
use sha2::{Digest, Sha256};

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(
    client: &mut DroneClient,
    identity: &str,
    secret: &str,
    cmd: Commands,
) -> Result<String, ClientError> {
    match cmd {
        Commands::Repl | Commands::List | Commands::HashSecret { .. } => {
            unreachable!("handled before connecting")
        }

        Commands::Login => {
            let token = client.login(identity, secret).await?;
            Ok(format!(
                "{} as {}\n{}",
                "Logged in".green(),
                identity.cyan(),
                token
            ))
        }

        Commands::Send { names } => {
            client.login(identity, secret).await?;

            let mut output = Vec::with_capacity(names.len());
            for name in &names {
                let status = client.send_command(name).await?;
                output.push(format_status(&status));
            }
            Ok(output.join("\n"))
        }
    }
}

/// Formats a status update, dimming unknown-command results.
pub fn format_status(status: &StatusUpdate) -> String {
    let description = if status.description.starts_with("Unknown command:") {
        status.description.yellow()
    } else {
        status.description.green()
    };
    format!("[{}] {}", status.identity.cyan(), description)
}

/// Returns the known command names and what they report.
pub fn list_commands() -> String {
    ACTION_TABLE
        .iter()
        .map(|action| format!("  {:<14} {}", action.name, action.description.dimmed()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hashes a secret the way the coordinator's secrets file expects.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
