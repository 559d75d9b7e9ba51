//! Resolution orchestrator
//!
//! Walks the source readers in fixed priority order, validates each
//! candidate, probes the ones whose source requires confirmation, and
//! returns the first accepted configuration. The winner is written back to
//! the local cache unless it came from there.

use crate::classify::determine_error_type;
use crate::clock::Clock;
use crate::logging::Logger;
use crate::probe::ConnectivityProber;
use crate::sources::{ConfigCache, SourceReader};
use crate::types::{ConfigSource, Configuration, ErrorKind};
use crate::validator::validate_configuration;
use crate::Result;
use std::sync::Arc;

/// Message used when no source offered anything specific
pub const NO_CONFIGURATION: &str = "No configuration found in any source";

/// Why a source did not win
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The reader itself reported a problem
    ReadFailed,
    /// The candidate failed validation
    Invalid,
    /// The candidate failed its connectivity probe
    Unreachable,
}

/// A source that was tried and rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Rejected source
    pub source: ConfigSource,
    /// Rejection reason
    pub reason: RejectReason,
    /// Error message
    pub message: String,
    /// Classified error
    pub kind: ErrorKind,
}

/// Result of one resolution pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Accepted configuration
    pub configuration: Option<Configuration>,
    /// Source of the accepted configuration
    pub source: Option<ConfigSource>,
    /// Most specific error when nothing was accepted
    pub error: Option<String>,
    /// Classification of `error`
    pub error_kind: Option<ErrorKind>,
    /// Every source that was tried and rejected, in priority order
    pub rejections: Vec<Rejection>,
}

impl Resolution {
    /// Whether a configuration was accepted
    pub fn is_found(&self) -> bool {
        self.configuration.is_some()
    }

    /// Whether some candidate existed but could not be reached
    pub fn had_unreachable_candidate(&self) -> bool {
        self.rejections
            .iter()
            .any(|r| r.reason == RejectReason::Unreachable)
    }
}

/// Priority-ordered configuration resolver
pub struct Resolver {
    readers: Vec<Arc<dyn SourceReader>>,
    prober: Arc<dyn ConnectivityProber>,
    cache: Arc<ConfigCache>,
    clock: Arc<dyn Clock>,
    environment: String,
    logger: Logger,
}

impl Resolver {
    /// Create a resolver; readers are sorted into fixed source priority
    pub fn new(
        mut readers: Vec<Arc<dyn SourceReader>>,
        prober: Arc<dyn ConnectivityProber>,
        cache: Arc<ConfigCache>,
        clock: Arc<dyn Clock>,
        environment: impl Into<String>,
    ) -> Self {
        readers.sort_by_key(|r| r.source().priority());
        Self {
            readers,
            prober,
            cache,
            clock,
            environment: environment.into(),
            logger: Logger::new("resolver"),
        }
    }

    /// Sources in the order they are consulted
    pub fn sources(&self) -> Vec<ConfigSource> {
        self.readers.iter().map(|r| r.source()).collect()
    }

    /// The local cache this resolver writes to
    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    /// Environment identifier stamped onto saved configurations
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Run one resolution pass
    pub async fn resolve(&self) -> Resolution {
        let mut rejections = Vec::new();

        for reader in &self.readers {
            let source = reader.source();
            let outcome = reader.read().await;

            let candidate = match outcome.configuration {
                Some(candidate) => candidate,
                None => {
                    if let Some(detail) = outcome.error_detail {
                        rejections.push(self.reject(source, RejectReason::ReadFailed, detail, None));
                    }
                    continue;
                }
            };

            if let Err(e) = validate_configuration(&candidate) {
                rejections.push(self.reject(
                    source,
                    RejectReason::Invalid,
                    e.to_string(),
                    Some(ErrorKind::Config),
                ));
                continue;
            }

            if source.requires_probe() {
                let probe = self.prober.probe(&candidate).await;
                if !probe.is_connected {
                    let message = format!(
                        "Connection check failed for {} ({}): {}",
                        source,
                        probe.error_code.as_deref().unwrap_or("unknown"),
                        probe.error.as_deref().unwrap_or("no detail")
                    );
                    let kind = probe.error_kind();
                    rejections.push(self.reject(source, RejectReason::Unreachable, message, Some(kind)));
                    continue;
                }
                self.logger.debug(&format!(
                    "{} reachable (permission: {:?})",
                    source, probe.permission
                ));
            }

            let accepted = if source == ConfigSource::LocalCache {
                candidate
            } else {
                let stamped = candidate.stamped(self.clock.now(), &self.environment);
                if let Err(e) = self.cache.save(&stamped) {
                    self.logger
                        .warn(&format!("Failed to cache configuration from {}: {}", source, e));
                }
                stamped
            };

            self.logger.success(&format!(
                "Configuration resolved from {} ({}, key {})",
                source,
                accepted.url,
                accepted.masked_key()
            ));
            return Resolution {
                configuration: Some(accepted),
                source: Some(source),
                error: None,
                error_kind: None,
                rejections,
            };
        }

        let (error, error_kind) = match rejections.first() {
            Some(first) => (first.message.clone(), first.kind),
            None => (NO_CONFIGURATION.to_string(), ErrorKind::Config),
        };
        self.logger.warn(&format!("Resolution failed: {}", error));

        Resolution {
            configuration: None,
            source: None,
            error: Some(error),
            error_kind: Some(error_kind),
            rejections,
        }
    }

    /// Validate and store a manually entered configuration, superseding the cache
    pub fn save_manual(&self, config: Configuration) -> Result<Configuration> {
        validate_configuration(&config)?;
        let stamped = config.stamped(self.clock.now(), &self.environment);
        self.cache.save(&stamped)?;
        self.logger.info(&format!("Saved manual configuration for {}", stamped.url));
        Ok(stamped)
    }

    /// Drop the cached configuration
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }

    fn reject(
        &self,
        source: ConfigSource,
        reason: RejectReason,
        message: String,
        kind: Option<ErrorKind>,
    ) -> Rejection {
        self.logger
            .warn(&format!("Rejected {} ({:?}): {}", source, reason, message));
        let kind = kind.unwrap_or_else(|| determine_error_type(&message));
        Rejection {
            source,
            reason,
            message,
            kind,
        }
    }
}
