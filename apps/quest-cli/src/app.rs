use quest_sdk::config::ClientConfig;
use quest_sdk::health::HealthProbe;
use quest_sdk::net::NetworkClient;
use quest_sdk::{ClientContext, GameClient};
use tokio::io::{self, BufReader};
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::shell::Shell;
use crate::telemetry;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    telemetry::init(&cli.logging.to_config()).map_err(|err| CliError::Logging(err.to_string()))?;

    let mut config = ClientConfig::from_env()?.with_base_url(&cli.server_url)?;
    if cli.state_dir.is_some() {
        config.state_dir = cli.state_dir.clone();
    }
    debug!(target: "quest::shell", base_url = %config.base_url, "configuration loaded");
    let ctx = ClientContext::with_file_storage(config)?;

    match cli.command {
        Some(Command::Health) => {
            let status = NetworkClient::new(ctx)?.probe().await;
            if status.ok {
                println!("online: {}", status.detail);
                Ok(())
            } else {
                Err(CliError::ServerUnavailable(status.detail))
            }
        }
        Some(Command::Classes) => {
            let client = GameClient::new(ctx)?;
            for (id, info) in client.catalogue().load(false).await {
                let stats: Vec<String> = info
                    .base_stats
                    .iter()
                    .map(|(stat, value)| format!("{stat} {value}"))
                    .collect();
                println!("{id:<10} {:<12} {}", info.name, info.description);
                if !stats.is_empty() {
                    println!("{:<10} {}", "", stats.join(", "));
                }
            }
            Ok(())
        }
        Some(Command::Play(args)) => {
            let client = GameClient::new(ctx)?;
            let mut shell = Shell::new(client, BufReader::new(io::stdin()));
            if !shell.start(args.name, args.class).await? {
                return Ok(());
            }
            shell.run().await
        }
        Some(Command::Resume) | None => {
            let client = GameClient::new(ctx)?;
            let mut shell = Shell::new(client, BufReader::new(io::stdin()));
            if !shell.resume_or_start().await? {
                return Ok(());
            }
            shell.run().await
        }
    }
}
