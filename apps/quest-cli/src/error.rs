use std::io;

use quest_sdk::error::{ConfigError, StoreError};
use quest_sdk::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session storage error: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("game server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
