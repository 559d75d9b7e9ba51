//! Error types for Beacon core

use crate::types::{BootstrapState, ErrorKind};
use thiserror::Error;

/// Main error type for Beacon operations
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Persisted key/value storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/HTTP transport error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP response
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected state machine transition
    #[error("Invalid bootstrap transition from {from} to {to}")]
    InvalidTransition {
        /// State the context was in
        from: BootstrapState,
        /// Requested state
        to: BootstrapState,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using BeaconError
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        BeaconError::Storage(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        BeaconError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        BeaconError::Validation(msg.into())
    }

    /// Create an HTTP status error
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        BeaconError::Http {
            status,
            body: body.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        BeaconError::Timeout(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        BeaconError::Other(msg.into())
    }

    /// Classify this error into the bootstrap error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BeaconError::Config(_) | BeaconError::Validation(_) => ErrorKind::Config,
            BeaconError::Network(_) | BeaconError::Timeout(_) => ErrorKind::Network,
            BeaconError::Http { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            other => crate::classify::determine_error_type(&other.to_string()),
        }
    }
}
