//! Tiercache - Tiered key-value cache over memory, SQLite and object storage

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{CacheOrchestrator, CachedValue};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, FileConfigSource};

/// Tiercache - Tiered key-value cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "TIERCACHE_CONFIG", default_value = "config/default.toml")]
    config: String,

    /// Log level, overrides the configuration file
    #[arg(long, env = "TIERCACHE_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value under a key in every tier
    Set {
        key: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove a key from every tier
    Remove { key: String },
    /// List the keys of the highest-priority tier
    Keys,
    /// Print per-tier and aggregated statistics
    Stats,
    /// Purge expired entries from every tier
    Cleanup,
    /// Remove every entry from every tier
    Clear,
    /// Keep the cache open, following configuration changes until interrupted
    Run {
        /// Seconds between statistics reports
        #[arg(long, default_value_t = 60)]
        report_interval: u64,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    if let Command::InitConfig { force } = args.command {
        if !force && std::path::Path::new(&args.config).exists() {
            bail!("{} already exists, pass --force to overwrite", args.config);
        }
        return Config::default().save(&args.config);
    }

    info!("Starting Tiercache v{}", env!("CARGO_PKG_VERSION"));

    let cache = open_cache(&config, &args.config).await?;
    let result = execute(&cache, args.command).await;

    cache.drain_background().await;
    cache.shutdown().await;
    result
}

/// Build the orchestrator and its providers
async fn open_cache(config: &Config, config_path: &str) -> Result<CacheOrchestrator> {
    let persistent = config.persistent_settings();
    if let Some(parent) = persistent.path.as_deref().and_then(|p| p.parent())
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }

    let factory = config.provider_factory()?;
    let cache = CacheOrchestrator::new(
        Arc::new(FileConfigSource::new(config_path)),
        Arc::new(factory),
        config.orchestrator_settings(),
    );

    let backends = cache.initialize().await?;
    info!(
        "Active backends: {}",
        backends
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(cache)
}

async fn execute(cache: &CacheOrchestrator, command: Command) -> Result<()> {
    match command {
        Command::Get { key } => match cache.get_value(&key).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(value.payload())?),
            None => bail!("Key '{}' not found", key),
        },
        Command::Set { key, value, ttl } => {
            let payload = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value));
            cache
                .set_value(
                    &key,
                    CachedValue::from_json(payload),
                    ttl.map(Duration::from_secs),
                )
                .await?;
            info!("Stored '{}'", key);
        }
        Command::Remove { key } => {
            cache.remove(&key).await;
            info!("Removed '{}'", key);
        }
        Command::Keys => {
            for key in cache.keys().await? {
                println!("{}", key);
            }
        }
        Command::Stats => print_stats(cache).await,
        Command::Cleanup => {
            let purged = cache.cleanup().await;
            println!("Purged {} expired entries", purged);
        }
        Command::Clear => {
            cache.clear().await;
            info!("Cleared every tier");
        }
        Command::Run { report_interval } => run(cache, report_interval).await,
        // Handled before the cache is opened
        Command::InitConfig { .. } => {}
    }
    Ok(())
}

async fn print_stats(cache: &CacheOrchestrator) {
    for (backend, stats) in cache.provider_stats().await {
        println!(
            "{:<10} hits={} misses={} sets={} removes={} size={} hit_ratio={:.2}",
            backend.as_str(),
            stats.hits,
            stats.misses,
            stats.sets,
            stats.removes,
            stats.size,
            stats.hit_ratio()
        );
    }
    let total = cache.stats().await;
    println!(
        "{:<10} hits={} misses={} sets={} removes={} size={} hit_ratio={:.2}",
        "total",
        total.hits,
        total.misses,
        total.sets,
        total.removes,
        total.size,
        total.hit_ratio()
    );
}

/// Report statistics periodically until a shutdown signal arrives
async fn run(cache: &CacheOrchestrator, report_interval: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(report_interval.max(1)));
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                // Reading stats also reconciles the provider set
                let stats = cache.stats().await;
                let backends = cache.active_backends().await;
                if backends.is_empty() {
                    warn!("No active cache backends");
                }
                info!(
                    hits = stats.hits,
                    misses = stats.misses,
                    size = stats.size,
                    background = cache.background_tasks(),
                    "Cache report: {} backends, hit ratio {:.2}",
                    backends.len(),
                    stats.hit_ratio()
                );
            }
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
