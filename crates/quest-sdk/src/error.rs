use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the game API transport and the components built on it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no response from game server: {detail}")]
    Network { detail: String, timed_out: bool },
    #[error("game server error {status}: {body}")]
    Server { status: StatusCode, body: String },
    #[error("request rejected {status}: {body}")]
    Client { status: StatusCode, body: String },
    #[error("session expired ({status})")]
    SessionExpired { status: StatusCode },
    #[error("unexpected response payload: {0}")]
    Parse(String),
    #[error("no active session")]
    NoSession,
    #[error("game server unavailable: {0}")]
    Unavailable(String),
    #[error("session storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    /// Only connectivity failures and 5xx responses are worth resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Server { .. })
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired { .. } | ApiError::NoSession)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::Parse(err.to_string());
        }
        ApiError::Network {
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("serialization error: {0}")]
    Toml(String),
    #[error("unable to determine home directory")]
    NoHomeDir,
}

impl From<toml::de::Error> for StoreError {
    fn from(value: toml::de::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(value: toml::ser::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {detail}")]
    Invalid { var: &'static str, detail: String },
}
