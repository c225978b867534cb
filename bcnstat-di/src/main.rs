//! bcnstat-di (Data Integration) - Main entry point
//!
//! Runs one full integration pass: dimension seeding, per-source extraction
//! and resolution, deduplication, temporal normalization, fact loading,
//! integrity validation, master table assembly. Each run is recorded in
//! `run_sessions` and summarized in the log; the process exits non-zero
//! when the run ends failed.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bcnstat_common::config::{ConfigOverrides, IntegrationConfig};
use bcnstat_common::db::init_database;
use bcnstat_di::dimension::Catalog;
use bcnstat_di::extract::Manifest;
use bcnstat_di::{IntegrationPipeline, RunOptions, RunStatus};

/// Command-line arguments for bcnstat-di
#[derive(Parser, Debug)]
#[command(name = "bcnstat-di")]
#[command(about = "Data integration engine for Barcelona neighborhood statistics")]
#[command(version)]
struct Args {
    /// Dataset manifest file (JSON array of dataset descriptors)
    #[arg(short, long, env = "BCNSTAT_MANIFEST")]
    manifest: PathBuf,

    /// Neighborhood catalog file (JSON, exactly 73 entries)
    #[arg(long, env = "BCNSTAT_CATALOG")]
    catalog: PathBuf,

    /// SQLite database file (overrides config file and BCNSTAT_DATABASE)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// TOML configuration file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop records before this year
    #[arg(long)]
    year_start: Option<i32>,

    /// Drop records after this year
    #[arg(long)]
    year_end: Option<i32>,

    /// Source tags to process, comma-separated (default: all)
    #[arg(long, value_delimiter = ',')]
    sources: Vec<String>,

    /// Abort on validation failures in non-critical tables too
    #[arg(long)]
    strict: bool,

    /// Rows per chunk during bulk loading
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bcnstat_di=info,bcnstat_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    // Log build identification IMMEDIATELY after tracing init
    info!(
        "Starting bcnstat Data Integration (bcnstat-di) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Resolve configuration: CLI > BCNSTAT_* environment > TOML > defaults
    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        database_path: args.database.clone(),
        chunk_size: args.chunk_size,
    };
    let config =
        IntegrationConfig::resolve(&overrides).context("Failed to resolve configuration")?;
    info!("Database path: {}", config.database_path.display());

    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {}", args.catalog.display()))?;

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let options = RunOptions {
        year_start: args.year_start,
        year_end: args.year_end,
        sources: args.sources,
        strict: args.strict,
    };

    let pipeline = IntegrationPipeline::new(pool, config, options);
    let summary = pipeline.run(&manifest, &catalog).await?;

    if summary.status == RunStatus::Failed {
        let reason = summary
            .error
            .clone()
            .unwrap_or_else(|| "see run summary".to_string());
        bail!("Integration run {} failed: {}", summary.run_id, reason);
    }

    info!("✓ Integration run {} succeeded", summary.run_id);
    Ok(())
}
