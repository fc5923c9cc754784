//! Error types for comparison operations.

use std::time::Duration;

use crate::timestamp::Timestamp;

/// Error type for comparison operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A time window whose end does not lie after its start.
    InvalidRange { start: Timestamp, end: Timestamp },

    /// A structurally invalid request (no metrics, mismatched windows, ...).
    InvalidRequest(String),

    /// A sub-query did not complete within the wait budget.
    BackendTimeout { query: String, timeout: Duration },

    /// The query backend failed to execute a sub-query.
    Backend(String),

    /// A metric expression could not be parsed or evaluated.
    Expression(String),

    /// Configuration could not be read or parsed.
    Config(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidRange { start, end } => {
                write!(f, "Invalid range: end {} is not after start {}", end, start)
            }
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::BackendTimeout { query, timeout } => write!(
                f,
                "Backend timeout: {} did not complete within {:?}",
                query, timeout
            ),
            Error::Backend(msg) => write!(f, "Backend error: {}", msg),
            Error::Expression(msg) => write!(f, "Expression error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Backend("sub-query task was cancelled".to_string())
        } else {
            Error::Backend(format!("sub-query task panicked: {}", err))
        }
    }
}

/// Result type alias for comparison operations.
pub type Result<T> = std::result::Result<T, Error>;
