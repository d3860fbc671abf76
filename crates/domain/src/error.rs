use serde::{Deserialize, Serialize};

/// A single validation problem, surfaced to callers as part of a 400 body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Dotted path into the offending record (e.g. `"content.kind"`).
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Shared error type used across all swarmgate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("invalid record")]
    InvalidRecord { issues: Vec<Issue> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("model {model}: {message}")]
    Model {
        model: String,
        message: String,
        /// HTTP status from the provider, when one was received.
        status: Option<u16>,
    },

    #[error("tool not available: {0}")]
    ToolUnavailable(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_record(issues: Vec<Issue>) -> Self {
        Error::InvalidRecord { issues }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
