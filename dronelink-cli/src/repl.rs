//! Interactive REPL.

use crate::commands::{format_status, list_commands};
use colored::Colorize;
use dronelink_client::{ClientError, DroneClient};
use dronelink_protocol::Outbound;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Available commands:
  help                  Show this help
  commands              List known drone commands
  <name>                Send COMMAND:<name> (e.g. takeoff, land)
  raw <frame>           Send a raw text frame and print the reply
  whoami                Show identity and credential

  quit, exit            Exit the REPL
"#;

pub async fn run(
    mut client: DroneClient,
    url: &str,
    identity: &str,
    secret: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "dronelink CLI".bold().cyan());
    println!("Connected to {}, logging in as {}...", url, identity);

    client.login(identity, secret).await?;
    println!("{}", "Logged in!".green());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".dronelink_history"))
        .unwrap_or_else(|_| ".dronelink_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", format!("{}>", identity).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e @ (ClientError::SessionExpired | ClientError::ConnectionClosed)) => {
                        println!("{}: {}", "Error".red(), e);
                        break;
                    }
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
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

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &mut DroneClient,
    line: &str,
) -> Result<Option<String>, ClientError> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match cmd.to_lowercase().as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "commands" | "ls" => Ok(Some(list_commands())),

        "whoami" => Ok(Some(format!(
            "{}\n{}",
            client.identity().unwrap_or("-").cyan(),
            client.credential().unwrap_or("-").dimmed()
        ))),

        "raw" => {
            if rest.is_empty() {
                return Ok(Some("Usage: raw <frame>".to_string()));
            }
            client.send_raw(rest).await?;
            let reply = client.recv().await?;
            Ok(Some(format_reply(&reply)))
        }

        _ => {
            let status = client.send_command(line).await?;
            Ok(Some(format_status(&status)))
        }
    }
}

fn format_reply(reply: &Outbound) -> String {
    let text = reply.to_string();
    match reply {
        Outbound::StatusUpdate { .. } | Outbound::Credential(_) => text.green().to_string(),
        _ => text.red().to_string(),
    }
}
