//! Unified error taxonomy for the dispatch core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingRequired(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level error type returned by every public operation in the dispatch core.
///
/// Each variant corresponds to one of the error kinds a caller needs to
/// distinguish: queue backpressure, queue expiry, shutdown-in-progress,
/// upstream failure, and configuration failure at init.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("lane '{lane}' is at capacity")]
    QueueFull { lane: String },

    #[error("request timed out waiting in lane '{lane}' after {waited:?}")]
    QueueTimeout {
        lane: String,
        waited: std::time::Duration,
    },

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("upstream call failed: {0}")]
    UpstreamFailure(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::UpstreamFailure(_))
    }
}
