//! Logging utilities

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: OnceCell<()> = OnceCell::new();

/// Logger wrapper that tags every message with a module name
#[derive(Clone, Debug)]
pub struct Logger {
    namespace: String,
}

impl Logger {
    /// Create a new logger with a namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The module tag
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        info!("[{}] {}", self.namespace, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        debug!("[{}] {}", self.namespace, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.namespace, message);
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        error!("[{}] {}", self.namespace, message);
    }

    /// Log a success message (info level with prefix)
    pub fn success(&self, message: &str) {
        info!("[{}] ✓ {}", self.namespace, message);
    }
}

/// Initialize the global logging system.
///
/// `RUST_LOG` wins over `BEACON_LOG_LEVEL`; calling this more than once is a no-op.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let level = std::env::var("BEACON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| level.into());

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_namespace() {
        let logger = Logger::new("resolver");
        assert_eq!(logger.namespace(), "resolver");
        logger.info("no subscriber installed, still fine");
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }
}
