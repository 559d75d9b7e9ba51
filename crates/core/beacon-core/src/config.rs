//! Configuration management and environment variable loading

use crate::retry::RetryConfig;
use crate::{BeaconError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from a .env file
///
/// Loads variables from a .env file in the current directory or a parent
/// directory. A missing file is not an error.
///
/// # Example
///
/// ```no_run
/// use beacon_core::load_env;
///
/// load_env().ok();
/// let origin = std::env::var("BEACON_ORIGIN").unwrap_or_default();
/// ```
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(BeaconError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(BeaconError::config(format!(
            "Failed to load .env file: {}",
            e
        ))),
    }
}

/// Load environment variables from a specific file
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(_) => {
            tracing::info!("Loaded environment from: {}", path.as_ref().display());
            Ok(())
        }
        Err(e) => Err(BeaconError::config(format!(
            "Failed to load {} environment file: {}",
            path.as_ref().display(),
            e
        ))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-empty environment variable
pub fn get_env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get environment variable as boolean
pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Get environment variable as integer
pub fn get_env_int<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Lenient boolean parsing shared by env vars, query params and settings rows
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Derive an environment identifier from a hostname.
///
/// `App.Example.com:8443` becomes `app-example-com-8443`.
pub fn environment_from_host(host: &str) -> String {
    let id: String = host
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let id = id.trim_matches('-').to_string();
    if id.is_empty() {
        "localhost".to_string()
    } else {
        id
    }
}

/// Tunables for the bootstrap subsystem
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Deployment origin the static config file is served from
    pub origin: String,
    /// Environment identifier scoping every storage key
    pub environment: String,
    /// Path of the static config file relative to the origin
    pub static_config_path: String,
    /// Remote settings table name
    pub settings_table: String,
    /// Directory for the on-disk key/value store
    pub storage_dir: PathBuf,
    /// End-to-end bound on one resolution
    pub init_timeout: Duration,
    /// Bound on a single static fetch or connectivity probe
    pub request_timeout: Duration,
    /// Lock records older than this are stale
    pub lock_duration: Duration,
    /// Attempts made by the monitor loop before giving up
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub retry_base_delay: Duration,
    /// Delay between CONNECTION_SUCCESS and COMPLETE
    pub settle_delay: Duration,
    /// Re-check interval while the instance is not visible
    pub idle_interval: Duration,
    /// Persisted contexts older than this are discarded
    pub context_ttl: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        let origin = "http://localhost:5173".to_string();
        Self {
            environment: environment_for_origin(&origin),
            origin,
            static_config_path: "/supabase-config.json".to_string(),
            settings_table: "system_settings".to_string(),
            storage_dir: PathBuf::from(".beacon"),
            init_timeout: Duration::from_millis(5_000),
            request_timeout: default_request_timeout(Duration::from_millis(5_000)),
            lock_duration: Duration::from_millis(10_000),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1_000),
            settle_delay: Duration::from_millis(2_000),
            idle_interval: Duration::from_millis(30_000),
            context_ttl: Duration::from_secs(3_600),
        }
    }
}

impl BootstrapSettings {
    /// Load from environment variables, defaulting anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let origin = get_env_or("BEACON_ORIGIN", &defaults.origin);
        let init_timeout = Duration::from_millis(get_env_int("BEACON_INIT_TIMEOUT_MS", 5_000));
        let request_timeout = Duration::from_millis(get_env_int(
            "BEACON_REQUEST_TIMEOUT_MS",
            default_request_timeout(init_timeout).as_millis() as u64,
        ));
        let environment = get_env_opt("BEACON_ENVIRONMENT")
            .map(|e| environment_from_host(&e))
            .unwrap_or_else(|| environment_for_origin(&origin));

        Self {
            environment,
            origin,
            static_config_path: get_env_or(
                "BEACON_STATIC_CONFIG_PATH",
                &defaults.static_config_path,
            ),
            settings_table: get_env_or("BEACON_SETTINGS_TABLE", &defaults.settings_table),
            storage_dir: get_env_opt("BEACON_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            init_timeout,
            request_timeout,
            lock_duration: Duration::from_millis(get_env_int("BEACON_LOCK_DURATION_MS", 10_000)),
            max_attempts: get_env_int("BEACON_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            retry_base_delay: Duration::from_millis(get_env_int("BEACON_RETRY_BASE_MS", 1_000)),
            settle_delay: Duration::from_millis(get_env_int("BEACON_SETTLE_DELAY_MS", 2_000)),
            idle_interval: Duration::from_millis(get_env_int("BEACON_IDLE_INTERVAL_MS", 30_000)),
            context_ttl: Duration::from_secs(get_env_int("BEACON_CONTEXT_TTL_SECS", 3_600)),
        }
    }

    /// Full URL of the static config file
    pub fn static_config_url(&self) -> String {
        format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            self.static_config_path.trim_start_matches('/')
        )
    }

    /// Storage keys for this environment
    pub fn keys(&self) -> StorageKeys {
        StorageKeys::for_environment(&self.environment)
    }
}

/// Per-request bound derived from the resolution budget.
///
/// Every static file attempt plus one probe fits inside `init_timeout`, so a
/// hanging origin cannot starve the lower-priority sources.
pub fn default_request_timeout(init_timeout: Duration) -> Duration {
    init_timeout / (RetryConfig::static_file().max_attempts + 2)
}

fn environment_for_origin(origin: &str) -> String {
    let host = url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| origin.to_string());
    environment_from_host(&host)
}

/// Environment-scoped keys in the shared key/value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// Cached configuration
    pub config: String,
    /// Persisted bootstrap context
    pub context: String,
    /// Cross-instance lock record
    pub lock: String,
}

impl StorageKeys {
    /// Keys for the given environment
    pub fn for_environment(environment: &str) -> Self {
        Self {
            config: format!("beacon:{}:config", environment),
            context: format!("beacon:{}:bootstrap_context", environment),
            lock: format!("beacon:{}:init_lock", environment),
        }
    }
}
