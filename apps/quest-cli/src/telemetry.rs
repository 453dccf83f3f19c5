use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// HTTP stack crates that flood trace output with connection internals.
const HTTP_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls"];

/// Environment knobs read once at startup.
#[derive(Debug, Default)]
struct FilterEnv {
    /// `QUEST_LOG_FILTER`: replaces the computed directive entirely.
    directive: Option<String>,
    /// `QUEST_TRACE_DEPS`: keep HTTP crates at trace too.
    http_traces: bool,
}

impl FilterEnv {
    fn read() -> Self {
        Self {
            directive: std::env::var("QUEST_LOG_FILTER")
                .ok()
                .filter(|raw| !raw.trim().is_empty()),
            http_traces: std::env::var("QUEST_TRACE_DEPS")
                .map(|raw| !raw.is_empty() && raw != "0")
                .unwrap_or(false),
        }
    }
}

/// Filter directive for `level`, and whether HTTP crates were held at info.
fn filter_directive(level: LogLevel, env: &FilterEnv) -> (String, bool) {
    if let Some(directive) = &env.directive {
        return (directive.clone(), false);
    }
    if level < LogLevel::Debug {
        return (level.as_str().to_owned(), false);
    }
    let level = level.as_str();
    let mut directive = format!("info,quest={level},quest_sdk={level},quest_cli={level}");
    let quiet_http = level == "trace" && !env.http_traces;
    if quiet_http {
        for target in HTTP_TARGETS {
            directive.push_str(&format!(",{target}=info"));
        }
    }
    (directive, quiet_http)
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let (directive, quiet_http) = filter_directive(config.level, &FilterEnv::read());

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    if quiet_http {
        eprintln!("[quest] HTTP client traces held at info; set QUEST_TRACE_DEPS=1 to see them");
    }
    Ok(())
}
