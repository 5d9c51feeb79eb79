//! tiercache - command line access to a durable cache store
//!
//! Opens the configured cache (memory + durable tiers) over a store
//! directory and runs one operation against it.
//!
//! ```text
//! tiercache --data-dir ./data set user:42 '{"name":"alice"}' --ttl 600
//! tiercache --data-dir ./data get user:42
//! tiercache --data-dir ./data stats --format prometheus
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::{
    CacheConfig, CacheLevel, DurableConfig, GetOptions, PrometheusExporter, SetOptions,
    TieredCacheManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered cache manager - inspect and modify a durable cache store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Durable store directory (overrides the configuration file)
    #[arg(long, env = "TIERCACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Durable quota in bytes (overrides the configuration file)
    #[arg(long, env = "TIERCACHE_QUOTA_BYTES")]
    quota_bytes: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TIERCACHE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "TIERCACHE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under a key
    Get {
        key: String,
        /// Tier to read
        #[arg(long, default_value = "all")]
        level: CacheLevel,
    },
    /// Store a JSON value
    Set {
        key: String,
        /// Value as JSON
        value: String,
        /// Lifetime in seconds (0 = never expires); category TTL if omitted
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove a key
    Delete { key: String },
    /// Remove every key starting with a prefix
    ClearPrefix { prefix: String },
    /// Remove expired records and recount metadata
    Sweep,
    /// Free at least this many bytes, oldest writes first
    Reclaim { bytes: u64 },
    /// Print cache statistics
    Stats {
        #[arg(long, value_enum, default_value_t = StatsFormat::Json)]
        format: StatsFormat,
    },
    /// Print durable quota usage
    Quota,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatsFormat {
    Json,
    Prometheus,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args);

    let config = load_config(&args)?;
    debug!(?config, "Opening cache");
    let cache: TieredCacheManager<Value> = TieredCacheManager::open(&config)
        .await
        .context("failed to open cache")?;

    let code = run(&cache, args.command).await?;
    cache.shutdown().await;
    Ok(code)
}

async fn run(cache: &TieredCacheManager<Value>, command: Command) -> Result<ExitCode> {
    match command {
        Command::Get { key, level } => match cache.get(&key, &GetOptions::level(level)).await {
            Some(value) => print_json(&value)?,
            None => {
                eprintln!("{}: not found", key);
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Set { key, value, ttl } => {
            let value: Value = serde_json::from_str(&value)
                .with_context(|| format!("value for {} is not valid JSON", key))?;
            let options = SetOptions {
                ttl_seconds: ttl,
                ..SetOptions::default()
            };
            if !cache.set(&key, value, &options).await {
                eprintln!("{}: not stored", key);
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete { key } => {
            if !cache.delete(&key, CacheLevel::All).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::ClearPrefix { prefix } => {
            println!("{}", cache.clear_by_prefix(&prefix).await);
        }
        Command::Sweep => {
            let report = durable(cache)?.sweep_expired().await?;
            print_json(&report)?;
        }
        Command::Reclaim { bytes } => {
            let report = durable(cache)?.reclaim(bytes).await?;
            print_json(&report)?;
        }
        Command::Stats { format } => {
            let stats = cache.refresh_stats().await;
            match format {
                StatsFormat::Json => print_json(&stats)?,
                StatsFormat::Prometheus => {
                    let exporter = PrometheusExporter::new()?;
                    exporter.observe(&stats);
                    if let Some(quota) = cache.quota().await {
                        exporter.observe_quota(&quota);
                    }
                    print!("{}", exporter.render()?);
                }
            }
        }
        Command::Quota => match cache.quota().await {
            Some(quota) => print_json(&quota)?,
            None => anyhow::bail!("durable tier is disabled"),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn durable(cache: &TieredCacheManager<Value>) -> Result<&tiercache::DurableTier> {
    cache
        .durable()
        .context("durable tier is disabled in the configuration")
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if args.data_dir.is_some() || args.quota_bytes.is_some() {
        let durable = config.durable.get_or_insert_with(DurableConfig::default);
        if let Some(dir) = &args.data_dir {
            durable.path = dir.clone();
        }
        if let Some(quota) = args.quota_bytes {
            durable.quota_bytes = quota;
        }
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr; stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
