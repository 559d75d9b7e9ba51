//! Local persisted configuration cache

use super::SourceReader;
use crate::logging::Logger;
use crate::storage::KeyValueStore;
use crate::types::{ConfigSource, Configuration, SourceOutcome};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Configuration cache entry in the shared key/value store.
///
/// Acts as the local-cache source reader and as the write target for
/// resolved configurations.
pub struct ConfigCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    logger: Logger,
}

impl ConfigCache {
    /// Cache stored under `key`
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            logger: Logger::new("config-cache"),
        }
    }

    /// Persist a configuration
    pub fn save(&self, config: &Configuration) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        self.store.set(&self.key, &raw)
    }

    /// Remove the cached configuration
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }

    /// Raw read without validation or purging
    pub fn peek(&self) -> Result<Option<Configuration>> {
        match self.store.get(&self.key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop an unusable entry; the source then counts as absent
    fn purge(&self, detail: String) -> SourceOutcome {
        self.logger.warn(&format!("{}; purging cache entry", detail));
        if let Err(e) = self.clear() {
            self.logger.warn(&format!("Failed to purge cache entry: {}", e));
        }
        SourceOutcome::absent()
    }
}

#[async_trait]
impl SourceReader for ConfigCache {
    fn source(&self) -> ConfigSource {
        ConfigSource::LocalCache
    }

    async fn read(&self) -> SourceOutcome {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SourceOutcome::absent(),
            Err(e) => {
                let detail = format!("Failed to read cached configuration: {}", e);
                self.logger.warn(&detail);
                return SourceOutcome::failed(detail);
            }
        };

        let config: Configuration = match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => return self.purge(format!("Cached configuration is corrupt: {}", e)),
        };

        if config.url.trim().is_empty() || config.anon_key.trim().is_empty() {
            return self.purge("Cached configuration has empty fields".to_string());
        }

        SourceOutcome::found(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const KEY: &str = "beacon:test:config";

    #[tokio::test]
    async fn test_reads_saved_configuration() {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(store, KEY);
        assert_eq!(cache.read().await, SourceOutcome::absent());

        let config = Configuration::new("https://x.example.com", "abc123def456");
        cache.save(&config).unwrap();
        assert_eq!(cache.read().await.configuration, Some(config));
    }

    #[tokio::test]
    async fn test_empty_fields_are_purged() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, r#"{"url":"https://x.example.com","anonKey":""}"#).unwrap();
        let cache = ConfigCache::new(store.clone(), KEY);

        assert_eq!(cache.read().await, SourceOutcome::absent());
        assert!(store.get(KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_purged() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "{not json").unwrap();
        let cache = ConfigCache::new(store.clone(), KEY);

        assert_eq!(cache.read().await, SourceOutcome::absent());
        assert!(store.is_empty());
    }
}
