use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::poll::PollSchedule;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000/api/";

/// Resubmission policy for requests that failed without a response or with a 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per `(method, path)` key, the first one included.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Delays used by the state reconciler to absorb server-side propagation lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTimings {
    pub cascade: PollSchedule,
    pub travel_settle: Duration,
    pub travel_fallback_settle: Duration,
    pub min_refresh_interval: Duration,
    pub auto_refresh_interval: Duration,
}

impl Default for ReconcileTimings {
    fn default() -> Self {
        Self {
            cascade: PollSchedule::default(),
            travel_settle: Duration::from_millis(500),
            travel_fallback_settle: Duration::from_millis(800),
            min_refresh_interval: Duration::from_millis(500),
            auto_refresh_interval: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Common prefix of every endpoint; always ends with `/`.
    pub base_url: Url,
    pub request_timeout: Duration,
    pub session_start_timeout: Duration,
    pub health_probe_timeout: Duration,
    pub catalogue_timeout: Duration,
    pub retry: RetryPolicy,
    pub health_interval: Duration,
    pub health_failure_threshold: u32,
    pub reconcile: ReconcileTimings,
    pub notification_poll_interval: Duration,
    pub message_capacity: usize,
    /// Directory holding the persisted session id. `None` means `~/.quest`.
    pub state_dir: Option<PathBuf>,
    pub menu_filter_extra: Vec<String>,
    pub selection_markers_extra: Vec<String>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = match env::var("QUEST_SERVER_URL") {
            Ok(raw) if !raw.trim().is_empty() => parse_base_url(raw.trim())?,
            _ => defaults.base_url.clone(),
        };

        let request_timeout = env_period("QUEST_REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout);
        let health_interval =
            env_period("QUEST_HEALTH_INTERVAL_MS")?.unwrap_or(defaults.health_interval);

        let mut retry = defaults.retry;
        if let Some(attempts) = env_number("QUEST_RETRY_ATTEMPTS")? {
            retry.max_attempts = attempts.max(1) as u32;
        }
        if let Some(delay) = env_millis("QUEST_RETRY_DELAY_MS")? {
            retry.delay = delay;
        }

        let state_dir = env::var("QUEST_STATE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            base_url,
            request_timeout,
            health_interval,
            retry,
            state_dir,
            menu_filter_extra: env_list("QUEST_MENU_FILTER"),
            selection_markers_extra: env_list("QUEST_SELECTION_MARKERS"),
            ..defaults
        })
    }

    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(raw)?;
        Ok(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_SERVER_URL).expect("default server url is valid"),
            request_timeout: Duration::from_millis(15_000),
            session_start_timeout: Duration::from_millis(30_000),
            health_probe_timeout: Duration::from_millis(8_000),
            catalogue_timeout: Duration::from_millis(5_000),
            retry: RetryPolicy::default(),
            health_interval: Duration::from_millis(30_000),
            health_failure_threshold: 3,
            reconcile: ReconcileTimings::default(),
            notification_poll_interval: Duration::from_millis(10_000),
            message_capacity: 100,
            state_dir: None,
            menu_filter_extra: Vec::new(),
            selection_markers_extra: Vec::new(),
        }
    }
}

/// Parses a server prefix, forcing a trailing slash so endpoint joins keep the prefix.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|err| ConfigError::Invalid {
        var: "QUEST_SERVER_URL",
        detail: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            var: "QUEST_SERVER_URL",
            detail: format!("'{raw}' cannot be used as a base url"),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn env_number(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| ConfigError::Invalid {
                var,
                detail: err.to_string(),
            }),
        _ => Ok(None),
    }
}

fn env_millis(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_number(var)?.map(Duration::from_millis))
}

/// Like [`env_millis`], but zero is rejected.
fn env_period(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env_millis(var)? {
        Some(period) if period.is_zero() => Err(ConfigError::Invalid {
            var,
            detail: "must be greater than zero".into(),
        }),
        other => Ok(other),
    }
}

fn env_list(var: &str) -> Vec<String> {
    env::var(var)
        .map(|raw| {
            raw.split('|')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
