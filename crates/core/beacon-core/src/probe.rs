//! Connectivity probing interface

use crate::types::{Configuration, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error code reported when the endpoint could not be reached at all
pub const NETWORK_ERROR: &str = "network_error";

/// Error code reported when the endpoint rejected the public key
pub const AUTH_ERROR: &str = "auth_error";

/// What the public key is allowed to do, as far as the optional check could tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Check skipped or inconclusive
    #[default]
    Unverified,
    /// Settings are readable with the public key
    Read,
    /// Reachable, but reads are restricted
    Restricted,
}

/// Outcome of a connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeResult {
    /// Endpoint answered without a hard failure
    pub is_connected: bool,
    /// Machine-readable failure code
    pub error_code: Option<String>,
    /// Human-readable failure message
    pub error: Option<String>,
    /// Informational result of the secondary permission check
    pub permission: PermissionLevel,
}

impl ProbeResult {
    /// Reachable endpoint
    pub fn connected(permission: PermissionLevel) -> Self {
        Self {
            is_connected: true,
            error_code: None,
            error: None,
            permission,
        }
    }

    /// Unreachable or rejected endpoint
    pub fn failed(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_connected: false,
            error_code: Some(code.into()),
            error: Some(error.into()),
            permission: PermissionLevel::Unverified,
        }
    }

    /// Taxonomy kind for a failed probe
    pub fn error_kind(&self) -> ErrorKind {
        match self.error_code.as_deref() {
            Some(NETWORK_ERROR) => ErrorKind::Network,
            Some(AUTH_ERROR) => ErrorKind::Auth,
            _ => self
                .error
                .as_deref()
                .map(crate::classify::determine_error_type)
                .unwrap_or(ErrorKind::Unknown),
        }
    }
}

/// Lightweight live check that a configuration's endpoint is usable.
///
/// Implementations must only use the public key and must never return an
/// error: every failure is folded into the [`ProbeResult`].
#[async_trait]
pub trait ConnectivityProber: Send + Sync {
    /// Probe the endpoint of `config`
    async fn probe(&self, config: &Configuration) -> ProbeResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_from_code() {
        assert_eq!(
            ProbeResult::failed(NETWORK_ERROR, "dns failure").error_kind(),
            ErrorKind::Network
        );
        assert_eq!(
            ProbeResult::failed(AUTH_ERROR, "bad key").error_kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            ProbeResult::failed("http_500", "database is starting up").error_kind(),
            ErrorKind::Database
        );
    }
}
