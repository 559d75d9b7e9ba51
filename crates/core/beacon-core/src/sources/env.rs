//! Process and build-time environment

use super::SourceReader;
use crate::config::parse_bool;
use crate::types::{ConfigSource, Configuration, SourceOutcome};
use async_trait::async_trait;
use std::collections::HashMap;

/// Endpoint URL variable
pub const URL_VAR: &str = "BEACON_SUPABASE_URL";
/// Public key variable
pub const ANON_KEY_VAR: &str = "BEACON_SUPABASE_ANON_KEY";
/// Elevated key variable
pub const SERVICE_KEY_VAR: &str = "BEACON_SUPABASE_SERVICE_KEY";
/// Initialization flag variable
pub const INITIALIZED_VAR: &str = "BEACON_SUPABASE_INITIALIZED";

/// Reads a configuration from environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvReader {
    vars: HashMap<String, String>,
}

impl EnvReader {
    /// Snapshot the process environment, falling back to values baked in at build time
    pub fn from_process() -> Self {
        let baked = [
            (URL_VAR, option_env!("BEACON_SUPABASE_URL")),
            (ANON_KEY_VAR, option_env!("BEACON_SUPABASE_ANON_KEY")),
            (SERVICE_KEY_VAR, option_env!("BEACON_SUPABASE_SERVICE_KEY")),
            (INITIALIZED_VAR, option_env!("BEACON_SUPABASE_INITIALIZED")),
        ];

        let vars = baked
            .into_iter()
            .filter_map(|(name, build_time)| {
                std::env::var(name)
                    .ok()
                    .or_else(|| build_time.map(str::to_string))
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        Self { vars }
    }

    /// Reader over an explicit variable map
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl SourceReader for EnvReader {
    fn source(&self) -> ConfigSource {
        ConfigSource::Environment
    }

    async fn read(&self) -> SourceOutcome {
        match (self.get(URL_VAR), self.get(ANON_KEY_VAR)) {
            (None, None) => SourceOutcome::absent(),
            (Some(url), Some(key)) => {
                let mut config = Configuration::new(url, key);
                config.service_key = self.get(SERVICE_KEY_VAR).map(str::to_string);
                config.initialized = self
                    .get(INITIALIZED_VAR)
                    .and_then(parse_bool)
                    .unwrap_or(false);
                SourceOutcome::found(config)
            }
            (Some(_), None) => {
                SourceOutcome::failed(format!("{} is set but {} is missing", URL_VAR, ANON_KEY_VAR))
            }
            (None, Some(_)) => {
                SourceOutcome::failed(format!("{} is set but {} is missing", ANON_KEY_VAR, URL_VAR))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_variables() {
        let reader = EnvReader::with_vars([
            (URL_VAR, "https://dev.example.com"),
            (ANON_KEY_VAR, "dev-key"),
            (SERVICE_KEY_VAR, "svc"),
            (INITIALIZED_VAR, "yes"),
        ]);
        let config = reader.read().await.configuration.unwrap();
        assert_eq!(config.url, "https://dev.example.com");
        assert_eq!(config.service_key.as_deref(), Some("svc"));
        assert!(config.initialized);
    }

    #[tokio::test]
    async fn test_empty_environment_is_absent() {
        let reader = EnvReader::with_vars([(URL_VAR, "  ")]);
        assert_eq!(reader.read().await, SourceOutcome::absent());
    }

    #[tokio::test]
    async fn test_half_configured_reports_detail() {
        let reader = EnvReader::with_vars([(URL_VAR, "https://dev.example.com")]);
        let outcome = reader.read().await;
        assert!(outcome.error_detail.unwrap().contains(ANON_KEY_VAR));
    }
}
