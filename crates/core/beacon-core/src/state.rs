//! Bootstrap state machine
//!
//! Tracks one bootstrap attempt sequence, persists it after every
//! transition so reloads pick up where they left off, and notifies
//! subscribers of each transition.

use crate::classify::determine_error_type;
use crate::clock::{elapsed_ms, Clock};
use crate::logging::Logger;
use crate::storage::KeyValueStore;
use crate::types::{BootstrapState, ConfigSource, ErrorKind};
use crate::{BeaconError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// Persisted record of the current bootstrap attempt sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapContext {
    /// Current state
    pub state: BootstrapState,
    /// Last error message
    #[serde(default)]
    pub last_error: Option<String>,
    /// Classification of the last error
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    /// Source of the last found configuration
    #[serde(default)]
    pub source: Option<ConfigSource>,
    /// Failure transitions so far
    #[serde(default)]
    pub retry_count: u32,
    /// Start of the latest attempt
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Latest confirmed connection
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    /// Owning environment
    #[serde(default)]
    pub environment: String,
}

impl BootstrapContext {
    /// Fresh context in the initial state
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            state: BootstrapState::Initial,
            last_error: None,
            error_kind: None,
            source: None,
            retry_count: 0,
            last_attempt: None,
            last_success: None,
            environment: environment.into(),
        }
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.last_attempt, self.last_success) {
            (Some(a), Some(s)) => Some(a.max(s)),
            (a, s) => a.or(s),
        }
    }
}

/// Values merged into the context by a transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionExtras {
    /// Error message to record
    pub error: Option<String>,
    /// Explicit classification; derived from `error` when absent
    pub error_kind: Option<ErrorKind>,
    /// Source of the configuration involved
    pub source: Option<ConfigSource>,
}

impl TransitionExtras {
    /// No extras
    pub fn none() -> Self {
        Self::default()
    }

    /// Record an error message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Record the configuration source
    pub fn source(source: ConfigSource) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    /// Attach an explicit error kind
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Attach a source
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// Transition callback
pub type TransitionListener = Arc<dyn Fn(&BootstrapContext) + Send + Sync>;

type ListenerList = RwLock<Vec<(u64, TransitionListener)>>;

/// Handle returned by [`StateMachine::subscribe`]; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Stop receiving transitions
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Persisted, observable bootstrap state machine
pub struct StateMachine {
    context: RwLock<BootstrapContext>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl: Duration,
    logger: Logger,
}

impl StateMachine {
    /// Restore the persisted context under `key`, or start fresh when it is
    /// missing, unreadable, from another environment, or older than `ttl`
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        environment: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let key = key.into();
        let environment = environment.into();
        let logger = Logger::new("bootstrap-state");

        let restored = match store.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<BootstrapContext>(&raw) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    logger.warn(&format!("Discarding unreadable bootstrap context: {}", e));
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                logger.warn(&format!("Failed to read bootstrap context: {}", e));
                None
            }
        };

        let now = clock.now();
        let context = restored
            .filter(|ctx| ctx.environment == environment)
            .filter(|ctx| {
                ctx.last_activity()
                    .map_or(true, |at| elapsed_ms(at, now) < ttl.as_millis() as u64)
            })
            .unwrap_or_else(|| BootstrapContext::new(environment));

        Self {
            context: RwLock::new(context),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            store,
            clock,
            key,
            ttl,
            logger,
        }
    }

    /// Snapshot of the current context
    pub fn context(&self) -> BootstrapContext {
        self.context
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        self.context.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Freshness window for persisted contexts
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Move to `next`, merging `extras`, persisting, and notifying subscribers
    pub fn transition_to(
        &self,
        next: BootstrapState,
        extras: TransitionExtras,
    ) -> Result<BootstrapContext> {
        let now = self.clock.now();
        let snapshot = {
            let mut ctx = self.context.write().unwrap_or_else(|e| e.into_inner());
            if !ctx.state.can_transition_to(next) {
                return Err(BeaconError::InvalidTransition {
                    from: ctx.state,
                    to: next,
                });
            }

            let previous = ctx.state;
            ctx.state = next;
            if let Some(source) = extras.source {
                ctx.source = Some(source);
            }

            match next {
                BootstrapState::Loading => ctx.last_attempt = Some(now),
                BootstrapState::ConnectionSuccess => {
                    ctx.last_success = Some(now);
                    ctx.last_error = None;
                    ctx.error_kind = None;
                }
                _ if next.is_failure() => {
                    let message = extras
                        .error
                        .clone()
                        .unwrap_or_else(|| "Bootstrap failed".to_string());
                    ctx.error_kind = Some(
                        extras
                            .error_kind
                            .unwrap_or_else(|| determine_error_type(&message)),
                    );
                    ctx.last_error = Some(message);
                    ctx.retry_count = ctx.retry_count.saturating_add(1);
                }
                _ => {
                    if let Some(message) = extras.error.clone() {
                        ctx.error_kind = Some(
                            extras
                                .error_kind
                                .unwrap_or_else(|| determine_error_type(&message)),
                        );
                        ctx.last_error = Some(message);
                    }
                }
            }

            self.logger.debug(&format!("{} -> {}", previous, next));
            ctx.clone()
        };

        self.persist(&snapshot);
        self.notify(&snapshot);
        Ok(snapshot)
    }

    /// Register a transition listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&BootstrapContext) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Forget all progress and remove the persisted context
    pub fn reset(&self) {
        let snapshot = {
            let mut ctx = self.context.write().unwrap_or_else(|e| e.into_inner());
            *ctx = BootstrapContext::new(ctx.environment.clone());
            ctx.clone()
        };
        if let Err(e) = self.store.remove(&self.key) {
            self.logger
                .warn(&format!("Failed to clear persisted bootstrap context: {}", e));
        }
        self.logger.info("Bootstrap context reset");
        self.notify(&snapshot);
    }

    fn persist(&self, ctx: &BootstrapContext) {
        let result = serde_json::to_string(ctx)
            .map_err(BeaconError::from)
            .and_then(|raw| self.store.set(&self.key, &raw));
        if let Err(e) = result {
            self.logger
                .warn(&format!("Failed to persist bootstrap context: {}", e));
        }
    }

    fn notify(&self, ctx: &BootstrapContext) {
        let listeners: Vec<TransitionListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(ctx);
        }
    }
}
