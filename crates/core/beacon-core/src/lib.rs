//! Beacon Core
//!
//! Locates, validates and caches the connection settings a client needs to
//! reach its hosted backend, and coordinates that bootstrap across instances
//! sharing one store. It includes:
//!
//! - Priority-ordered configuration sources (cache, explicit parameters,
//!   static deployment file, environment, remote settings table)
//! - Validation and connectivity probing of candidates
//! - A persisted, observable bootstrap state machine
//! - A time-bounded cross-instance lock
//!
//! # Example
//!
//! ```no_run
//! use beacon_core::*;
//! use std::sync::Arc;
//!
//! # async fn run(prober: Arc<dyn ConnectivityProber>) -> Result<()> {
//! let settings = BootstrapSettings::from_env();
//! let store: Arc<dyn KeyValueStore> =
//!     Arc::new(DegradingStore::new(Arc::new(FileStore::open(&settings.storage_dir)?)));
//! let bootstrapper = BootstrapBuilder::new(settings, store, prober)
//!     .environment(EnvReader::from_process())
//!     .build();
//! let context = bootstrapper.run().await;
//! println!("{}", context.state);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub use uuid::Uuid;

pub mod bootstrap;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod probe;
pub mod resolver;
pub mod retry;
pub mod sources;
pub mod state;
pub mod storage;
pub mod testing;
pub mod types;
pub mod validator;

pub use bootstrap::{AlwaysVisible, AttemptOutcome, BootstrapBuilder, Bootstrapper, Visibility};
pub use classify::determine_error_type;
pub use clock::{elapsed_ms, Clock, SystemClock};
pub use config::{
    default_request_timeout, environment_from_host, get_env_bool, get_env_int, get_env_opt, get_env_or, load_env,
    load_env_from_path, parse_bool, BootstrapSettings, StorageKeys,
};
pub use error::{BeaconError, Result};
pub use lock::{InstanceLock, LockRecord};
pub use logging::{init_logging, Logger};
pub use probe::{ConnectivityProber, PermissionLevel, ProbeResult, AUTH_ERROR, NETWORK_ERROR};
pub use resolver::{RejectReason, Rejection, Resolution, Resolver, NO_CONFIGURATION};
pub use retry::{retry_with_backoff, BackoffStrategy, RetryConfig};
pub use sources::{
    assemble_configuration, bootstrap_credentials_from_env, ConfigCache, EnvReader,
    ExplicitParamsReader, HttpStaticFileFetcher, RemoteBootstrapReader, RemoteSettingsStore,
    SourceReader, StaticConfigDocument, StaticFileFetcher, StaticFileReader, SETTING_KEYS,
};
pub use state::{BootstrapContext, StateMachine, Subscription, TransitionExtras, TransitionListener};
pub use storage::{DegradingStore, FileStore, KeyValueStore, MemoryStore};
pub use types::{
    BootstrapState, ConfigSource, Configuration, Credentials, ErrorKind, SettingRow,
    SourceOutcome,
};
pub use validator::{is_valid, validate_configuration};
