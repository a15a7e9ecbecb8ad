use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlindControlError>;

#[derive(Error, Debug)]
pub enum BlindControlError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("invalid base url {0:?}")]
    InvalidBaseUrl(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of a single telemetry poll.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("telemetry request failed with status {0}")]
    Status(StatusCode),
    #[error("malformed telemetry body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure of a single control command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("command request failed with status {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => FetchError::Status(status),
            None => FetchError::Network(error),
        }
    }
}

impl From<reqwest::Error> for CommandError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => CommandError::Status(status),
            None => CommandError::Network(error),
        }
    }
}
