use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "quest",
    about = "Play a Quest game session from the terminal",
    version
)]
pub struct Cli {
    #[arg(
        long = "server-url",
        global = true,
        env = "QUEST_SERVER_URL",
        default_value = "http://127.0.0.1:5000/api/",
        help = "Base URL of the game server API"
    )]
    pub server_url: String,

    #[arg(
        long = "state-dir",
        global = true,
        env = "QUEST_STATE_DIR",
        value_name = "DIR",
        help = "Directory holding the persisted session (defaults to ~/.quest)"
    )]
    pub state_dir: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "QUEST_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        global = true,
        help = "Log verbosity (error, warn, info, debug, trace)"
    )]
    pub log_level: LogLevel,

    #[arg(
        long = "log-file",
        env = "QUEST_LOG_FILE",
        value_name = "PATH",
        global = true,
        help = "Append logs to this file instead of stderr"
    )]
    pub log_file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new adventure (prompts for anything not given).
    Play(PlayArgs),
    /// Continue the persisted session, falling back to a new one.
    Resume,
    /// List the character classes the server offers.
    Classes,
    /// Probe the game server once and report its status.
    Health,
}

#[derive(Args, Debug, Default)]
pub struct PlayArgs {
    #[arg(long, help = "Character name")]
    pub name: Option<String>,
    #[arg(long, help = "Character class identifier (e.g. mago)")]
    pub class: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_accepts_name_and_class() {
        let cli = Cli::try_parse_from([
            "quest",
            "--server-url",
            "http://game.local/api/",
            "play",
            "--name",
            "Aria",
            "--class",
            "mago",
        ])
        .expect("parses");
        assert_eq!(cli.server_url, "http://game.local/api/");
        match cli.command {
            Some(Command::Play(args)) => {
                assert_eq!(args.name.as_deref(), Some("Aria"));
                assert_eq!(args.class.as_deref(), Some("mago"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn subcommand_is_optional() {
        let cli = Cli::try_parse_from(["quest"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn logging_flags_are_global() {
        let cli = Cli::try_parse_from(["quest", "health", "--log-level", "debug", "--log-file", "q.log"])
            .expect("parses");
        let config = cli.logging.to_config();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.file, Some(PathBuf::from("q.log")));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["quest", "--log-level", "loud"]).is_err());
    }
}
