//! Explicit runtime parameters (query string / deep link)

use super::SourceReader;
use crate::config::parse_bool;
use crate::logging::Logger;
use crate::types::{ConfigSource, Configuration, SourceOutcome};
use async_trait::async_trait;

const URL_PARAMS: &[&str] = &["supabase_url", "url"];
const KEY_PARAMS: &[&str] = &["supabase_anon_key", "key"];
const SERVICE_KEY_PARAMS: &[&str] = &["supabase_service_key", "service_key"];
const INITIALIZED_PARAMS: &[&str] = &["initialized"];

/// Reads a configuration override from a query string
pub struct ExplicitParamsReader {
    query: Option<String>,
    logger: Logger,
}

impl ExplicitParamsReader {
    /// Reader over the query part of a request (leading `?` optional)
    pub fn new(query: Option<String>) -> Self {
        Self {
            query,
            logger: Logger::new("params"),
        }
    }

    /// Reader over the query string of a full URL
    pub fn from_url(link: &str) -> Self {
        let query = url::Url::parse(link)
            .ok()
            .and_then(|u| u.query().map(str::to_string));
        Self::new(query)
    }

    fn pairs(&self) -> Vec<(String, String)> {
        let Some(query) = self.query.as_deref() else {
            return Vec::new();
        };
        url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    })
}

#[async_trait]
impl SourceReader for ExplicitParamsReader {
    fn source(&self) -> ConfigSource {
        ConfigSource::ExplicitParams
    }

    async fn read(&self) -> SourceOutcome {
        let pairs = self.pairs();
        let url = lookup(&pairs, URL_PARAMS);
        let key = lookup(&pairs, KEY_PARAMS);

        if url.is_none() && key.is_none() {
            return SourceOutcome::absent();
        }

        let url = url.unwrap_or_default().trim();
        let key = key.unwrap_or_default().trim();
        if url.is_empty() || key.is_empty() {
            let detail = "Explicit parameters present but incomplete: both URL and key are required";
            self.logger.warn(detail);
            return SourceOutcome::failed(detail);
        }

        let mut config = Configuration::new(url, key);
        if let Some(service) = lookup(&pairs, SERVICE_KEY_PARAMS).filter(|v| !v.trim().is_empty()) {
            config.service_key = Some(service.trim().to_string());
        }
        config.initialized = lookup(&pairs, INITIALIZED_PARAMS)
            .and_then(parse_bool)
            .unwrap_or(false);

        self.logger.debug("Configuration supplied through explicit parameters");
        SourceOutcome::found(config)
    }
}
