//! Error types for the fetch and download core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a single HTTP fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, TLS or body transfer failure
    #[error("network error: {0}")]
    Network(String),
    /// Server answered with a non-2xx status
    #[error("HTTP error: {0}")]
    Status(u16),
    /// Request or body read exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Task-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Network-related failure, including timeouts and non-2xx statuses
    #[error(transparent)]
    Network(#[from] FetchError),
    /// Malformed provider JSON or unreadable image bytes
    #[error("decode error: {0}")]
    Decode(String),
    /// Destination could not be opened or written
    #[error("file error at {}: {message}", .path.display())]
    Filesystem { path: PathBuf, message: String },
    /// Another in-flight download is already writing this path
    #[error("already downloading to {}", .0.display())]
    AlreadyDownloading(PathBuf),
}

impl TaskError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        TaskError::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Invalid engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable present but not a valid number
    #[error("invalid value for {name}: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    /// A setting that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
