//! Static configuration file shipped with the deployment

use super::SourceReader;
use crate::clock::Clock;
use crate::logging::Logger;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::{ConfigSource, Configuration, SourceOutcome};
use crate::{BeaconError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// JSON document served at the well-known static path
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticConfigDocument {
    /// Host the file was generated for
    #[serde(default)]
    pub host: Option<String>,
    /// Endpoint URL
    #[serde(default)]
    pub url: String,
    /// Public key
    #[serde(default, alias = "anonKey")]
    pub key: String,
    /// When the file was last regenerated
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl StaticConfigDocument {
    /// Convert into a configuration candidate
    pub fn into_configuration(self) -> Configuration {
        let mut config = Configuration::new(self.url.trim(), self.key.trim());
        if let Some(host) = self.host.filter(|h| !h.trim().is_empty()) {
            config.environment = crate::config::environment_from_host(&host);
        }
        if let Some(updated) = self.last_updated {
            config.saved_at = updated;
        }
        config
    }
}

/// Fetches the static document
///
/// `Ok(None)` means the deployment ships no such file; `Err` is a transient
/// failure worth retrying.
#[async_trait]
pub trait StaticFileFetcher: Send + Sync {
    /// Fetch the document
    async fn fetch(&self) -> Result<Option<StaticConfigDocument>>;
}

/// HTTP GET against the deployment origin
pub struct HttpStaticFileFetcher {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpStaticFileFetcher {
    /// Fetcher for the document at `url`
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BeaconError::other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout: Duration::from_secs(1),
        })
    }

    /// Bound each request to `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StaticFileFetcher for HttpStaticFileFetcher {
    async fn fetch(&self) -> Result<Option<StaticConfigDocument>> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BeaconError::http(status.as_u16(), body));
        }

        // Dev servers answer unknown paths with index.html
        let body = response.text().await?;
        if body.trim_start().starts_with('<') {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }
}

/// Source reader over a [`StaticFileFetcher`] with linear retry
pub struct StaticFileReader {
    fetcher: Arc<dyn StaticFileFetcher>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    fetch_timeout: Option<Duration>,
    logger: Logger,
}

impl StaticFileReader {
    /// Reader with the default three-attempt linear backoff
    pub fn new(fetcher: Arc<dyn StaticFileFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            retry: RetryConfig::static_file(),
            fetch_timeout: None,
            logger: Logger::new("static-file"),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Abandon any single fetch that takes longer than `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl SourceReader for StaticFileReader {
    fn source(&self) -> ConfigSource {
        ConfigSource::StaticFile
    }

    async fn read(&self) -> SourceOutcome {
        let fetcher = self.fetcher.as_ref();
        let limit = self.fetch_timeout;
        let fetched = retry_with_backoff(&self.retry, self.clock.as_ref(), move |_| async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, fetcher.fetch())
                    .await
                    .unwrap_or_else(|_| {
                        Err(BeaconError::timeout(format!(
                            "Static config fetch took longer than {} ms",
                            limit.as_millis()
                        )))
                    }),
                None => fetcher.fetch().await,
            }
        })
        .await;

        match fetched {
            Ok(Some(document)) => SourceOutcome::found(document.into_configuration()),
            Ok(None) => SourceOutcome::absent(),
            Err(e) => {
                let detail = format!(
                    "Static config file unavailable after {} attempts: {}",
                    self.retry.max_attempts, e
                );
                self.logger.warn(&detail);
                SourceOutcome::failed(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, ScriptedFetcher};

    #[test]
    fn test_document_accepts_anon_key_alias() {
        let doc: StaticConfigDocument = serde_json::from_str(
            r#"{"host":"App.example.com","url":"https://x.example.com","anonKey":"k","lastUpdated":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let config = doc.into_configuration();
        assert_eq!(config.anon_key, "k");
        assert_eq!(config.environment, "app-example-com");
        assert_eq!(config.saved_at, "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let clock = Arc::new(ManualClock::default());
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err("connection reset".into()),
            Err("connection reset".into()),
            Ok(Some(StaticConfigDocument {
                url: "https://x.example.com".into(),
                key: "k".into(),
                ..Default::default()
            })),
        ]));
        let reader = StaticFileReader::new(fetcher.clone(), clock.clone());

        let outcome = reader.read().await;
        assert_eq!(outcome.configuration.unwrap().url, "https://x.example.com");
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(1_000)]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let clock = Arc::new(ManualClock::default());
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let reader = StaticFileReader::new(fetcher.clone(), clock);

        let outcome = reader.read().await;
        assert!(outcome.configuration.is_none());
        assert!(outcome.error_detail.unwrap().contains("after 3 attempts"));
        assert_eq!(fetcher.calls(), 3);
    }

    struct HangingFetcher;

    #[async_trait]
    impl StaticFileFetcher for HangingFetcher {
        async fn fetch(&self) -> Result<Option<StaticConfigDocument>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hanging_fetch_is_abandoned_per_attempt() {
        let clock = Arc::new(ManualClock::default());
        let reader = StaticFileReader::new(Arc::new(HangingFetcher), clock.clone())
            .with_fetch_timeout(Duration::from_millis(20));

        let outcome = reader.read().await;
        assert!(outcome.configuration.is_none());
        let detail = outcome.error_detail.unwrap();
        assert!(detail.contains("after 3 attempts"), "{}", detail);
        assert!(detail.contains("longer than 20 ms"), "{}", detail);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_http_fetch_times_out_on_silent_origin() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/supabase-config.json", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = HttpStaticFileFetcher::new(url)
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_retried() {
        let clock = Arc::new(ManualClock::default());
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(None)]));
        let reader = StaticFileReader::new(fetcher.clone(), clock.clone());

        assert_eq!(reader.read().await, SourceOutcome::absent());
        assert_eq!(fetcher.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }
}
