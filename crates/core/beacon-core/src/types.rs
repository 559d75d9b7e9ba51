//! Core types: configuration, sources, bootstrap states and error kinds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolved connection descriptor for the hosted backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Project endpoint URL (e.g., https://xxx.supabase.co)
    #[serde(default)]
    pub url: String,

    /// Public (anon) access key
    #[serde(default)]
    pub anon_key: String,

    /// Elevated (service role) key, only used for privileged operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,

    /// Whether the remote project has been initialized
    #[serde(default)]
    pub initialized: bool,

    /// RFC 3339 timestamp of the last save
    #[serde(default)]
    pub saved_at: String,

    /// Owning environment identifier
    #[serde(default)]
    pub environment: String,
}

impl Configuration {
    /// Create a configuration from an endpoint and public key
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            ..Default::default()
        }
    }

    /// Attach an elevated key
    pub fn with_service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// Set the owning environment
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Stamp the save time and fill in the environment if the source left it blank
    pub fn stamped(mut self, now: DateTime<Utc>, environment: &str) -> Self {
        self.saved_at = now.to_rfc3339();
        if self.environment.trim().is_empty() {
            self.environment = environment.to_string();
        }
        self
    }

    /// Public key with all but the first characters masked, for logs
    pub fn masked_key(&self) -> String {
        let visible: String = self.anon_key.chars().take(6).collect();
        format!("{}…", visible)
    }
}

/// Origin of a configuration candidate, in descending priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicit runtime parameters (query string / deep link)
    ExplicitParams,
    /// Static file shipped with the deployment
    StaticFile,
    /// Local persisted cache
    LocalCache,
    /// Process or build-time environment
    Environment,
    /// Remote settings store reached with bootstrap credentials
    RemoteBootstrap,
    /// Saved through the manual setup flow
    Manual,
}

impl ConfigSource {
    /// Priority rank, lower wins
    pub fn priority(self) -> u8 {
        match self {
            ConfigSource::ExplicitParams => 0,
            ConfigSource::StaticFile => 1,
            ConfigSource::LocalCache => 2,
            ConfigSource::Environment => 3,
            ConfigSource::RemoteBootstrap => 4,
            ConfigSource::Manual => 5,
        }
    }

    /// Whether a candidate from this source must pass a connectivity probe
    pub fn requires_probe(self) -> bool {
        matches!(
            self,
            ConfigSource::ExplicitParams | ConfigSource::StaticFile | ConfigSource::RemoteBootstrap
        )
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::ExplicitParams => "explicit_params",
            ConfigSource::StaticFile => "static_file",
            ConfigSource::LocalCache => "local_cache",
            ConfigSource::Environment => "environment",
            ConfigSource::RemoteBootstrap => "remote_bootstrap",
            ConfigSource::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Classified bootstrap error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Transport failure, CORS, timeout
    Network,
    /// Rejected credentials or missing permission
    Auth,
    /// Backend query or schema problem
    Database,
    /// Missing or malformed configuration
    Config,
    /// Anything else
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Database => "database",
            ErrorKind::Config => "config",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Bootstrap progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootstrapState {
    /// Fresh or reset, no attempt made
    #[default]
    Initial,
    /// Resolver is iterating sources
    Loading,
    /// A validated configuration was obtained
    ConfigFound,
    /// The configuration was confirmed reachable
    ConnectionSuccess,
    /// Settled success
    Complete,
    /// No usable configuration anywhere
    ConfigMissing,
    /// A candidate existed but could not be used
    ConnectionError,
}

impl BootstrapState {
    /// Whether this state ends an attempt with a failure
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            BootstrapState::ConfigMissing | BootstrapState::ConnectionError
        )
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(self, next: BootstrapState) -> bool {
        use BootstrapState::*;
        match (self, next) {
            (_, Loading) => true,
            (Loading, ConfigFound | ConfigMissing | ConnectionError) => true,
            (ConfigFound, ConnectionSuccess | ConnectionError) => true,
            (ConnectionSuccess, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Initial => "INITIAL",
            BootstrapState::Loading => "LOADING",
            BootstrapState::ConfigFound => "CONFIG_FOUND",
            BootstrapState::ConnectionSuccess => "CONNECTION_SUCCESS",
            BootstrapState::Complete => "COMPLETE",
            BootstrapState::ConfigMissing => "CONFIG_MISSING",
            BootstrapState::ConnectionError => "CONNECTION_ERROR",
        };
        f.write_str(name)
    }
}

/// Result of one source reader invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOutcome {
    /// Candidate configuration, if the source produced one
    pub configuration: Option<Configuration>,
    /// Why the source produced nothing, when that is worth reporting
    pub error_detail: Option<String>,
}

impl SourceOutcome {
    /// The source produced a candidate
    pub fn found(configuration: Configuration) -> Self {
        Self {
            configuration: Some(configuration),
            error_detail: None,
        }
    }

    /// The source simply has nothing to offer
    pub fn absent() -> Self {
        Self::default()
    }

    /// The source failed or held unusable data
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            configuration: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// Endpoint plus public key, used for bootstrap and remote queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Endpoint URL
    pub url: String,
    /// Public key
    pub anon_key: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
        }
    }

    /// View these credentials as a bare configuration (for probing)
    pub fn as_configuration(&self) -> Configuration {
        Configuration::new(self.url.clone(), self.anon_key.clone())
    }
}

/// One key/value row of the remote settings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRow {
    /// Setting name
    pub key: String,
    /// Setting value
    #[serde(default)]
    pub value: Option<String>,
}

impl SettingRow {
    /// Create a settings row
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_parses_minimal_cache_entry() {
        let config: Configuration =
            serde_json::from_str(r#"{"url":"https://x.example.com","anonKey":"abc123def456"}"#)
                .unwrap();
        assert_eq!(config.url, "https://x.example.com");
        assert_eq!(config.anon_key, "abc123def456");
        assert!(config.service_key.is_none());
        assert!(!config.initialized);
    }

    #[test]
    fn test_source_priority_order() {
        let mut sources = vec![
            ConfigSource::RemoteBootstrap,
            ConfigSource::LocalCache,
            ConfigSource::ExplicitParams,
            ConfigSource::Environment,
            ConfigSource::StaticFile,
        ];
        sources.sort_by_key(|s| s.priority());
        assert_eq!(
            sources,
            vec![
                ConfigSource::ExplicitParams,
                ConfigSource::StaticFile,
                ConfigSource::LocalCache,
                ConfigSource::Environment,
                ConfigSource::RemoteBootstrap,
            ]
        );
    }

    #[test]
    fn test_state_transitions() {
        use BootstrapState::*;
        assert!(Initial.can_transition_to(Loading));
        assert!(Loading.can_transition_to(ConfigFound));
        assert!(ConfigFound.can_transition_to(ConnectionSuccess));
        assert!(ConnectionSuccess.can_transition_to(Complete));
        assert!(ConnectionError.can_transition_to(Loading));

        assert!(!Initial.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(ConfigFound));
        assert!(!ConnectionSuccess.can_transition_to(ConfigFound));
        assert!(!Loading.can_transition_to(Initial));
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&BootstrapState::ConnectionSuccess).unwrap();
        assert_eq!(json, "\"CONNECTION_SUCCESS\"");
        assert_eq!(BootstrapState::ConfigMissing.to_string(), "CONFIG_MISSING");
    }
}
