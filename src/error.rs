//! Error types for backup-relay
//!
//! Every failure that can end a backup cycle is a variant of `RelayError`.
//! Catalog and naming failures keep their own enums so callers can match on
//! the exact rule that was violated.

use reqwest::StatusCode;
use thiserror::Error;

/// Application-wide error type
///
/// All variants are terminal to the current cycle. Messages carry the
/// request target or the offending input so an operator can act on them.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No response was obtained (connect, DNS, timeout, body read)
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 4xx response, never retried; `body` is the start of the response body
    #[error("got client error {status} for URL {url}{}", body_suffix(.body))]
    ClientStatus {
        url: String,
        status: StatusCode,
        body: String,
    },

    /// 5xx response that persisted after the retry budget was spent
    #[error(
        "the request to {url} failed with {status} after {retries} retries{}",
        body_suffix(.body)
    )]
    ServerStatus {
        url: String,
        status: StatusCode,
        retries: u32,
        body: String,
    },

    /// Any status outside 2xx/4xx/5xx
    #[error("unexpected response {status} for URL {url}")]
    UnexpectedStatus { url: String, status: StatusCode },

    /// Backup catalog could not yield a candidate
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Destination name could not be made legal
    #[error(transparent)]
    Name(#[from] NameError),

    /// Payload grew past the configured cap
    #[error("backup at {url} exceeded the upload limit of {limit} bytes")]
    SizeExceeded { url: String, limit: u64 },

    /// Invalid or missing settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination collaborator rejected the upload
    #[error("Upload error: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Reasons a candidate set yields no selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("the list of available backups is empty")]
    Empty,

    #[error("the list of possible backups includes a blank URL (version {version:?})")]
    MissingLocation { version: String },

    #[error("cannot parse backup version {version:?}: {reason}")]
    BadVersion { version: String, reason: String },

    #[error("unable to parse the available backups from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// Reasons a raw path cannot be mapped to a destination name
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("the filepath cannot exceed {limit} characters (got {len})")]
    TooLong { len: usize, limit: usize },

    #[error("filepath {path:?} contains disallowed file/folder name: {segment}")]
    ReservedSegment { segment: String, path: String },

    #[error("the filename {file_name:?} cannot include {pattern:?}")]
    ForbiddenSubstring { file_name: String, pattern: String },
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl RelayError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Transport { .. } => "transport",
            RelayError::ClientStatus { .. } => "client_status",
            RelayError::ServerStatus { .. } => "server_status",
            RelayError::UnexpectedStatus { .. } => "unexpected_status",
            RelayError::Catalog(_) => "catalog",
            RelayError::Name(_) => "name",
            RelayError::SizeExceeded { .. } => "size_exceeded",
            RelayError::Config(_) => "config",
            RelayError::Upload(_) => "upload",
            RelayError::Io(_) => "io",
            RelayError::Internal(_) => "internal",
        }
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

/// Result type alias using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
