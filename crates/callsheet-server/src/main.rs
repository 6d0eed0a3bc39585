mod cli;

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use callsheet_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use callsheet_server::{AppConfig, build_engine, build_worker, observability};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use cli::{Cli, Commands};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From CALLSHEET_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (callsheet.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (CALLSHEET_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(
            e,
            dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        )
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let (config_path, source) = resolve_config_path(cli.config.as_deref());
    let cfg = load_config(Some(&config_path))
        .map_err(anyhow::Error::msg)
        .context("Configuration error")?;

    info!(path = %config_path, source = %source, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    match cli.command {
        Commands::Run(args) => run_worker(&cfg, args).await?,
        Commands::Redrive(args) => {
            let engine = build_engine(&cfg).await?;
            let limit = args.limit.unwrap_or(cfg.webhooks.redrive_batch_size);
            let report = engine.redrive(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats(args) => {
            let engine = build_engine(&cfg).await?;
            let stats = engine.delivery_stats(&args.organization).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn run_worker(cfg: &AppConfig, args: cli::RunArgs) -> Result<()> {
    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.redrive_interval());
    let batch_size = args.batch_size.unwrap_or(cfg.webhooks.redrive_batch_size);
    if interval.is_zero() || batch_size == 0 {
        anyhow::bail!("--interval-secs and --batch-size must be > 0");
    }

    let engine = build_engine(cfg).await?;
    let worker = build_worker(engine, batch_size);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    worker.run(interval, shutdown_rx).await;
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: CALLSHEET_CONFIG
/// 3. Default: callsheet.toml
fn resolve_config_path(cli_path: Option<&str>) -> (String, ConfigSource) {
    if let Some(path) = cli_path {
        return (path.to_string(), ConfigSource::CliArgument);
    }

    if let Ok(path) = env::var("CALLSHEET_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
