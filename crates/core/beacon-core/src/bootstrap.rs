//! Bootstrap composition: lock, resolve, drive the state machine, retry
//!
//! [`Bootstrapper::attempt`] performs one guarded resolution;
//! [`Bootstrapper::run`] is the bounded monitor loop around it.

use crate::clock::{Clock, SystemClock};
use crate::config::BootstrapSettings;
use crate::lock::InstanceLock;
use crate::logging::Logger;
use crate::probe::ConnectivityProber;
use crate::resolver::{RejectReason, Resolver, NO_CONFIGURATION};
use crate::retry::RetryConfig;
use crate::sources::{
    ConfigCache, EnvReader, ExplicitParamsReader, RemoteBootstrapReader, RemoteSettingsStore,
    SourceReader, StaticFileFetcher, StaticFileReader,
};
use crate::state::{BootstrapContext, StateMachine, Subscription, TransitionExtras};
use crate::storage::KeyValueStore;
use crate::types::{BootstrapState, ConfigSource, Configuration, Credentials, ErrorKind};
use crate::{BeaconError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Whether the hosting instance is in the foreground.
///
/// Probing is suppressed while hidden.
pub trait Visibility: Send + Sync {
    /// Current visibility
    fn is_visible(&self) -> bool;
}

/// Instance that is always in the foreground
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl Visibility for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

impl Visibility for AtomicBool {
    fn is_visible(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl Visibility for tokio::sync::watch::Receiver<bool> {
    fn is_visible(&self) -> bool {
        *self.borrow()
    }
}

/// Result of a single bootstrap attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Configuration found and confirmed
    Connected {
        /// Accepted configuration
        configuration: Configuration,
        /// Where it came from
        source: ConfigSource,
    },
    /// Another instance holds the lock
    Skipped,
    /// Attempt ended in a failure state
    Failed {
        /// `ConfigMissing` or `ConnectionError`
        state: BootstrapState,
        /// Classified error
        kind: ErrorKind,
        /// Error message
        message: String,
        /// Source of a candidate that failed its probe, if any
        unreachable: Option<ConfigSource>,
    },
}

/// Drives configuration bootstrap for one instance
pub struct Bootstrapper {
    resolver: Resolver,
    machine: Arc<StateMachine>,
    lock: InstanceLock,
    clock: Arc<dyn Clock>,
    visibility: Arc<dyn Visibility>,
    retry: RetryConfig,
    init_timeout: Duration,
    settle_delay: Duration,
    idle_interval: Duration,
    logger: Logger,
}

impl Bootstrapper {
    /// Assemble from parts, taking timings from `settings`
    pub fn new(
        resolver: Resolver,
        machine: Arc<StateMachine>,
        lock: InstanceLock,
        clock: Arc<dyn Clock>,
        settings: &BootstrapSettings,
    ) -> Self {
        Self {
            resolver,
            machine,
            lock,
            clock,
            visibility: Arc::new(AlwaysVisible),
            retry: RetryConfig::exponential(settings.max_attempts, settings.retry_base_delay),
            init_timeout: settings.init_timeout,
            settle_delay: settings.settle_delay,
            idle_interval: settings.idle_interval,
            logger: Logger::new("bootstrap"),
        }
    }

    /// Replace the visibility source
    pub fn with_visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    /// The underlying resolver
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Shared state machine
    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    /// The cross-instance lock
    pub fn lock(&self) -> &InstanceLock {
        &self.lock
    }

    /// Snapshot of the bootstrap context
    pub fn context(&self) -> BootstrapContext {
        self.machine.context()
    }

    /// Observe transitions
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&BootstrapContext) + Send + Sync + 'static,
    {
        self.machine.subscribe(listener)
    }

    /// Forget the bootstrap context and the cached configuration
    pub fn reset(&self) -> Result<()> {
        self.machine.reset();
        self.resolver.clear_cache()
    }

    /// One lock-guarded bootstrap attempt.
    ///
    /// Returns [`AttemptOutcome::Skipped`] without touching the state machine
    /// when another instance is bootstrapping.
    pub async fn attempt(&self) -> Result<AttemptOutcome> {
        if !self.lock.acquire() {
            self.logger
                .info("Another instance is bootstrapping, skipping this attempt");
            return Ok(AttemptOutcome::Skipped);
        }

        let outcome = self.attempt_locked().await;
        self.lock.release();
        let outcome = outcome?;

        if matches!(outcome, AttemptOutcome::Connected { .. }) {
            self.clock.sleep(self.settle_delay).await;
            self.machine
                .transition_to(BootstrapState::Complete, TransitionExtras::none())?;
        }
        Ok(outcome)
    }

    async fn attempt_locked(&self) -> Result<AttemptOutcome> {
        self.machine
            .transition_to(BootstrapState::Loading, TransitionExtras::none())?;

        let resolution =
            match tokio::time::timeout(self.init_timeout, self.resolver.resolve()).await {
                Ok(resolution) => resolution,
                Err(_) => {
                    let err = BeaconError::timeout(format!(
                        "client initialization took longer than {} ms",
                        self.init_timeout.as_millis()
                    ));
                    return self.fail(
                        BootstrapState::ConnectionError,
                        err.kind(),
                        err.to_string(),
                        None,
                    );
                }
            };

        match (resolution.configuration, resolution.source) {
            (Some(configuration), Some(source)) => {
                self.machine.transition_to(
                    BootstrapState::ConfigFound,
                    TransitionExtras::source(source),
                )?;
                self.machine
                    .transition_to(BootstrapState::ConnectionSuccess, TransitionExtras::none())?;
                Ok(AttemptOutcome::Connected {
                    configuration,
                    source,
                })
            }
            _ => {
                let unreachable = resolution
                    .rejections
                    .iter()
                    .find(|r| r.reason == RejectReason::Unreachable)
                    .map(|r| r.source);
                let state = if unreachable.is_some() {
                    BootstrapState::ConnectionError
                } else {
                    BootstrapState::ConfigMissing
                };
                let message = resolution
                    .error
                    .unwrap_or_else(|| NO_CONFIGURATION.to_string());
                let kind = resolution.error_kind.unwrap_or(ErrorKind::Config);
                self.fail(state, kind, message, unreachable)
            }
        }
    }

    fn fail(
        &self,
        state: BootstrapState,
        kind: ErrorKind,
        message: String,
        unreachable: Option<ConfigSource>,
    ) -> Result<AttemptOutcome> {
        self.logger.warn(&format!("Bootstrap attempt failed ({}): {}", kind, message));
        self.machine
            .transition_to(state, TransitionExtras::error(message.clone()).with_kind(kind))?;
        Ok(AttemptOutcome::Failed {
            state,
            kind,
            message,
            unreachable,
        })
    }

    async fn wait_until_visible(&self) {
        let mut logged = false;
        while !self.visibility.is_visible() {
            if !logged {
                self.logger.debug("Instance hidden, suspending bootstrap probes");
                logged = true;
            }
            self.clock.sleep(self.idle_interval).await;
        }
    }

    /// Bounded monitor loop.
    ///
    /// Retries failed or skipped attempts with exponential backoff until one
    /// connects or the attempts run out, then returns the final context. A
    /// cached configuration is dropped when the static file's candidate kept
    /// failing its probe.
    pub async fn run(&self) -> BootstrapContext {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut static_unreachable = 0u32;

        for attempt in 0..max_attempts {
            self.wait_until_visible().await;

            match self.attempt().await {
                Ok(AttemptOutcome::Connected { .. }) => return self.machine.context(),
                Ok(AttemptOutcome::Skipped) => {}
                Ok(AttemptOutcome::Failed { unreachable, .. }) => {
                    if unreachable == Some(ConfigSource::StaticFile) {
                        static_unreachable += 1;
                    }
                }
                Err(e) => self.logger.error(&format!("Bootstrap attempt aborted: {}", e)),
            }

            if attempt + 1 < max_attempts {
                let delay = self.retry.delay_for(attempt);
                self.logger.debug(&format!(
                    "Retrying bootstrap in {} ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt + 2,
                    max_attempts
                ));
                self.clock.sleep(delay).await;
            }
        }

        if static_unreachable >= 2 {
            self.logger
                .warn("Static config candidate repeatedly unreachable, clearing cached configuration");
            if let Err(e) = self.resolver.clear_cache() {
                self.logger.warn(&format!("Failed to clear cache: {}", e));
            }
        }

        let context = self.machine.context();
        self.logger.error(&format!(
            "Bootstrap gave up after {} attempts in state {}: {}",
            max_attempts,
            context.state,
            context.last_error.as_deref().unwrap_or("no error recorded")
        ));
        context
    }
}

/// Builds a [`Bootstrapper`] with the standard source chain
pub struct BootstrapBuilder {
    settings: BootstrapSettings,
    store: Arc<dyn KeyValueStore>,
    prober: Arc<dyn ConnectivityProber>,
    clock: Arc<dyn Clock>,
    visibility: Arc<dyn Visibility>,
    params: Option<String>,
    static_fetcher: Option<Arc<dyn StaticFileFetcher>>,
    static_retry: Option<RetryConfig>,
    env: Option<EnvReader>,
    remote: Option<(Option<Credentials>, Arc<dyn RemoteSettingsStore>)>,
    extra: Vec<Arc<dyn SourceReader>>,
}

impl BootstrapBuilder {
    /// Start from settings, shared storage and a prober
    pub fn new(
        settings: BootstrapSettings,
        store: Arc<dyn KeyValueStore>,
        prober: Arc<dyn ConnectivityProber>,
    ) -> Self {
        Self {
            settings,
            store,
            prober,
            clock: Arc::new(SystemClock),
            visibility: Arc::new(AlwaysVisible),
            params: None,
            static_fetcher: None,
            static_retry: None,
            env: None,
            remote: None,
            extra: Vec::new(),
        }
    }

    /// Use a different clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a visibility source
    pub fn visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Read explicit parameters from a query string
    pub fn explicit_params(mut self, query: Option<String>) -> Self {
        self.params = query;
        self
    }

    /// Read the static deployment file through `fetcher`
    pub fn static_file(mut self, fetcher: Arc<dyn StaticFileFetcher>) -> Self {
        self.static_fetcher = Some(fetcher);
        self
    }

    /// Override the static file retry policy
    pub fn static_file_retry(mut self, retry: RetryConfig) -> Self {
        self.static_retry = Some(retry);
        self
    }

    /// Read the environment through `reader`
    pub fn environment(mut self, reader: EnvReader) -> Self {
        self.env = Some(reader);
        self
    }

    /// Query the remote settings store with bootstrap `credentials`
    pub fn remote(
        mut self,
        credentials: Option<Credentials>,
        store: Arc<dyn RemoteSettingsStore>,
    ) -> Self {
        self.remote = Some((credentials, store));
        self
    }

    /// Add a custom reader; it is ordered by its source priority
    pub fn reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.extra.push(reader);
        self
    }

    /// Assemble the bootstrapper
    pub fn build(self) -> Bootstrapper {
        let keys = self.settings.keys();
        let cache = Arc::new(ConfigCache::new(self.store.clone(), keys.config.clone()));

        let mut readers: Vec<Arc<dyn SourceReader>> = vec![cache.clone()];
        if self.params.is_some() {
            readers.push(Arc::new(ExplicitParamsReader::new(self.params)));
        }
        if let Some(fetcher) = self.static_fetcher {
            let mut reader = StaticFileReader::new(fetcher, self.clock.clone())
                .with_fetch_timeout(self.settings.request_timeout);
            if let Some(retry) = self.static_retry {
                reader = reader.with_retry(retry);
            }
            readers.push(Arc::new(reader));
        }
        if let Some(env) = self.env {
            readers.push(Arc::new(env));
        }
        if let Some((credentials, store)) = self.remote {
            readers.push(Arc::new(RemoteBootstrapReader::new(
                credentials,
                store,
                self.prober.clone(),
            )));
        }
        readers.extend(self.extra);

        let resolver = Resolver::new(
            readers,
            self.prober,
            cache,
            self.clock.clone(),
            self.settings.environment.clone(),
        );
        let machine = Arc::new(StateMachine::load(
            self.store.clone(),
            self.clock.clone(),
            keys.context,
            self.settings.environment.clone(),
            self.settings.context_ttl,
        ));
        let lock = InstanceLock::new(
            self.store,
            self.clock.clone(),
            keys.lock,
            self.settings.lock_duration,
        );

        Bootstrapper::new(resolver, machine, lock, self.clock, &self.settings)
            .with_visibility(self.visibility)
    }
}
