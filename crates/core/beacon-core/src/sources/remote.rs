//! Remote settings store reached with a bootstrap credential pair

use super::SourceReader;
use crate::config::{get_env_opt, parse_bool};
use crate::logging::Logger;
use crate::probe::ConnectivityProber;
use crate::types::{ConfigSource, Configuration, Credentials, SettingRow, SourceOutcome};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Settings rows that make up a configuration
pub const SETTING_KEYS: &[&str] = &[
    "supabase_url",
    "supabase_anon_key",
    "supabase_service_key",
    "initialized",
];

/// Bootstrap endpoint variable
pub const BOOTSTRAP_URL_VAR: &str = "BEACON_BOOTSTRAP_URL";
/// Bootstrap public key variable
pub const BOOTSTRAP_KEY_VAR: &str = "BEACON_BOOTSTRAP_ANON_KEY";

/// Key/value settings table on the hosted backend
#[async_trait]
pub trait RemoteSettingsStore: Send + Sync {
    /// Read the rows named by `keys` using `credentials`
    async fn fetch_settings(
        &self,
        credentials: &Credentials,
        keys: &[&str],
    ) -> Result<Vec<SettingRow>>;
}

/// Bootstrap credentials from `BEACON_BOOTSTRAP_URL` / `BEACON_BOOTSTRAP_ANON_KEY`
pub fn bootstrap_credentials_from_env() -> Option<Credentials> {
    Some(Credentials::new(
        get_env_opt(BOOTSTRAP_URL_VAR)?,
        get_env_opt(BOOTSTRAP_KEY_VAR)?,
    ))
}

/// Assemble a configuration from settings rows; `None` unless URL and key are both set
pub fn assemble_configuration(rows: &[SettingRow]) -> Option<Configuration> {
    let value = |key: &str| {
        rows.iter()
            .find(|row| row.key == key)
            .and_then(|row| row.value.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let mut config = Configuration::new(value("supabase_url")?, value("supabase_anon_key")?);
    config.service_key = value("supabase_service_key").map(str::to_string);
    config.initialized = value("initialized").and_then(parse_bool).unwrap_or(false);
    Some(config)
}

/// Fetches the real configuration from the remote settings table
pub struct RemoteBootstrapReader {
    credentials: Option<Credentials>,
    store: Arc<dyn RemoteSettingsStore>,
    prober: Arc<dyn ConnectivityProber>,
    logger: Logger,
}

impl RemoteBootstrapReader {
    /// Reader using the given bootstrap pair (if any)
    pub fn new(
        credentials: Option<Credentials>,
        store: Arc<dyn RemoteSettingsStore>,
        prober: Arc<dyn ConnectivityProber>,
    ) -> Self {
        Self {
            credentials,
            store,
            prober,
            logger: Logger::new("remote-bootstrap"),
        }
    }
}

#[async_trait]
impl SourceReader for RemoteBootstrapReader {
    fn source(&self) -> ConfigSource {
        ConfigSource::RemoteBootstrap
    }

    async fn read(&self) -> SourceOutcome {
        let Some(credentials) = &self.credentials else {
            return SourceOutcome::absent();
        };

        let probe = self.prober.probe(&credentials.as_configuration()).await;
        if !probe.is_connected {
            let detail = format!(
                "Bootstrap endpoint unreachable ({}): {}",
                probe.error_code.as_deref().unwrap_or("unknown"),
                probe.error.as_deref().unwrap_or("no detail")
            );
            self.logger.warn(&detail);
            return SourceOutcome::failed(detail);
        }

        let rows = match self.store.fetch_settings(credentials, SETTING_KEYS).await {
            Ok(rows) => rows,
            Err(e) => {
                let detail = format!("Failed to fetch remote settings: {}", e);
                self.logger.warn(&detail);
                return SourceOutcome::failed(detail);
            }
        };

        match assemble_configuration(&rows) {
            Some(config) => SourceOutcome::found(config),
            None => SourceOutcome::failed(
                "Remote settings are missing supabase_url or supabase_anon_key",
            ),
        }
    }
}
