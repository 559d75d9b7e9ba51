//! Beacon bootstrap runner
//!
//! Resolves the backend configuration the same way a client instance does,
//! and inspects or resets the state it persists.

use anyhow::{bail, Context};
use beacon_core::{
    bootstrap_credentials_from_env, get_env_opt, init_logging, load_env, load_env_from_path,
    BootstrapBuilder, BootstrapContext, BootstrapSettings, BootstrapState, Bootstrapper,
    ConfigCache, Configuration, DegradingStore, EnvReader, ExplicitParamsReader, FileStore,
    HttpStaticFileFetcher, InstanceLock, KeyValueStore, StateMachine, SystemClock,
};
use beacon_storage_supabase::{SupabaseProber, SupabaseSettingsStore};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Environment file to load instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Storage directory (overrides BEACON_STORAGE_DIR)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a configuration and drive the bootstrap to completion
    Run {
        /// Query string or full URL carrying supabase_url/supabase_anon_key
        #[arg(long)]
        params: Option<String>,

        /// Skip the static deployment file
        #[arg(long)]
        no_static: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the persisted bootstrap context, cached configuration and lock
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Clear the persisted context, cached configuration and lock
    Reset,
    /// Save a manually entered configuration into the local cache
    Save {
        /// Endpoint URL
        #[arg(long)]
        url: String,

        /// Public (anon) key
        #[arg(long)]
        anon_key: String,

        /// Service role key
        #[arg(long)]
        service_key: Option<String>,
    },
    /// Publish a configuration to the remote settings table
    Publish {
        /// Endpoint URL
        #[arg(long)]
        url: String,

        /// Public (anon) key to publish
        #[arg(long)]
        anon_key: String,

        /// Service role key used to authenticate the write
        /// (defaults to BEACON_SUPABASE_SERVICE_KEY)
        #[arg(long)]
        service_key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON document
    Json,
}

fn open_store(settings: &BootstrapSettings) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let file = FileStore::open(&settings.storage_dir).with_context(|| {
        format!(
            "Failed to open storage directory {}",
            settings.storage_dir.display()
        )
    })?;
    Ok(Arc::new(DegradingStore::new(Arc::new(file))))
}

fn prober(settings: &BootstrapSettings) -> Arc<SupabaseProber> {
    Arc::new(
        SupabaseProber::new()
            .with_permission_check(settings.settings_table.clone())
            .with_timeout(settings.request_timeout),
    )
}

fn bootstrapper(
    settings: &BootstrapSettings,
    store: Arc<dyn KeyValueStore>,
    params: Option<String>,
    static_file: bool,
) -> anyhow::Result<Bootstrapper> {
    let mut builder = BootstrapBuilder::new(settings.clone(), store, prober(settings))
        .environment(EnvReader::from_process())
        .remote(
            bootstrap_credentials_from_env(),
            Arc::new(SupabaseSettingsStore::new(settings.settings_table.clone())),
        );

    builder = match params {
        Some(link) if link.starts_with("http://") || link.starts_with("https://") => {
            builder.reader(Arc::new(ExplicitParamsReader::from_url(&link)))
        }
        query => builder.explicit_params(query),
    };

    if static_file {
        let fetcher = HttpStaticFileFetcher::new(settings.static_config_url())
            .context("Failed to create static config fetcher")?
            .with_timeout(settings.request_timeout);
        builder = builder.static_file(Arc::new(fetcher));
    }

    Ok(builder.build())
}

fn print_context(context: &BootstrapContext, cached: Option<&Configuration>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let document = serde_json::json!({
                "context": context,
                "configuration": cached.map(|c| serde_json::json!({
                    "url": c.url,
                    "anonKey": c.masked_key(),
                    "hasServiceKey": c.service_key.is_some(),
                    "initialized": c.initialized,
                    "savedAt": c.saved_at,
                    "environment": c.environment,
                })),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&document).unwrap_or_else(|_| document.to_string())
            );
        }
        OutputFormat::Text => {
            println!("Environment:  {}", context.environment);
            println!("State:        {}", context.state);
            if let Some(source) = context.source {
                println!("Source:       {}", source);
            }
            println!("Retries:      {}", context.retry_count);
            if let Some(error) = &context.last_error {
                let kind = context
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("Last error:   {} ({})", error, kind);
            }
            if let Some(at) = context.last_attempt {
                println!("Last attempt: {}", at.to_rfc3339());
            }
            if let Some(at) = context.last_success {
                println!("Last success: {}", at.to_rfc3339());
            }
            match cached {
                Some(config) => println!(
                    "Cached:       {} (key {}, saved {})",
                    config.url,
                    config.masked_key(),
                    if config.saved_at.is_empty() { "unknown" } else { config.saved_at.as_str() }
                ),
                None => println!("Cached:       none"),
            }
        }
    }
}

async fn run(
    settings: &BootstrapSettings,
    store: Arc<dyn KeyValueStore>,
    params: Option<String>,
    static_file: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let bootstrapper = bootstrapper(settings, store, params, static_file)?;
    let _subscription = bootstrapper.subscribe(|ctx| {
        info!("Bootstrap state: {}", ctx.state);
    });

    let context = tokio::select! {
        context = bootstrapper.run() => context,
        _ = tokio::signal::ctrl_c() => {
            bootstrapper.lock().release();
            bail!("Interrupted");
        }
    };

    let cached = bootstrapper.resolver().cache().peek().unwrap_or(None);
    print_context(&context, cached.as_ref(), format);

    if context.state != BootstrapState::Complete {
        bail!(
            "Bootstrap ended in {}: {}",
            context.state,
            context.last_error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

fn status(
    settings: &BootstrapSettings,
    store: Arc<dyn KeyValueStore>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let keys = settings.keys();
    let clock = Arc::new(SystemClock);
    let machine = StateMachine::load(
        store.clone(),
        clock.clone(),
        keys.context,
        settings.environment.clone(),
        settings.context_ttl,
    );
    let cached = ConfigCache::new(store.clone(), keys.config)
        .peek()
        .context("Failed to read cached configuration")?;
    print_context(&machine.context(), cached.as_ref(), format);

    let lock = InstanceLock::new(store, clock, keys.lock, settings.lock_duration);
    if let Some(record) = lock.current() {
        println!("Lock held since {} ms (epoch)", record.acquired_at);
    }
    Ok(())
}

fn reset(settings: &BootstrapSettings, store: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    let bootstrapper = bootstrapper(settings, store, None, false)?;
    bootstrapper.reset().context("Failed to clear cached configuration")?;
    bootstrapper.lock().release();
    println!("Bootstrap state for '{}' cleared", settings.environment);
    Ok(())
}

fn save(
    settings: &BootstrapSettings,
    store: Arc<dyn KeyValueStore>,
    config: Configuration,
) -> anyhow::Result<()> {
    let bootstrapper = bootstrapper(settings, store, None, false)?;
    let saved = bootstrapper
        .resolver()
        .save_manual(config)
        .context("Configuration rejected")?;
    println!("Saved {} (key {})", saved.url, saved.masked_key());
    Ok(())
}

async fn publish(
    settings: &BootstrapSettings,
    url: String,
    anon_key: String,
    service_key: Option<String>,
) -> anyhow::Result<()> {
    let Some(service_key) = service_key.or_else(|| get_env_opt("BEACON_SUPABASE_SERVICE_KEY"))
    else {
        bail!("A service role key is required (--service-key or BEACON_SUPABASE_SERVICE_KEY)");
    };

    let config = Configuration::new(url.clone(), anon_key);
    let written = SupabaseSettingsStore::new(settings.settings_table.clone())
        .with_timeout(settings.init_timeout)
        .publish_settings(&url, &service_key, &config)
        .await
        .context("Failed to publish settings")?;
    println!("Published {} settings to {}", written, settings.settings_table);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => load_env_from_path(path)?,
        None => load_env()?,
    }
    init_logging();

    let mut settings = BootstrapSettings::from_env();
    if let Some(dir) = cli.storage_dir {
        settings.storage_dir = dir;
    }

    match cli.command {
        Command::Run {
            params,
            no_static,
            format,
        } => {
            let store = open_store(&settings)?;
            run(&settings, store, params, !no_static, format).await
        }
        Command::Status { format } => status(&settings, open_store(&settings)?, format),
        Command::Reset => reset(&settings, open_store(&settings)?),
        Command::Save {
            url,
            anon_key,
            service_key,
        } => {
            let mut config = Configuration::new(url, anon_key);
            if let Some(key) = service_key {
                config = config.with_service_key(key);
            }
            save(&settings, open_store(&settings)?, config)
        }
        Command::Publish {
            url,
            anon_key,
            service_key,
        } => publish(&settings, url, anon_key, service_key).await,
    }
}
