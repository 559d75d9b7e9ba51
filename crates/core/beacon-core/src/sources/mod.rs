//! Configuration source readers
//!
//! Each reader tries to produce a [`Configuration`](crate::types::Configuration)
//! from one origin. Readers never fail: problems are folded into the
//! returned [`SourceOutcome`].

use crate::types::{ConfigSource, SourceOutcome};
use async_trait::async_trait;

pub mod cache;
pub mod env;
pub mod params;
pub mod remote;
pub mod static_file;

pub use cache::ConfigCache;
pub use env::EnvReader;
pub use params::ExplicitParamsReader;
pub use remote::{
    assemble_configuration, bootstrap_credentials_from_env, RemoteBootstrapReader,
    RemoteSettingsStore, SETTING_KEYS,
};
pub use static_file::{HttpStaticFileFetcher, StaticConfigDocument, StaticFileFetcher, StaticFileReader};

/// A single configuration origin
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Which origin this reader represents
    fn source(&self) -> ConfigSource;

    /// Attempt to produce a candidate
    async fn read(&self) -> SourceOutcome;
}
