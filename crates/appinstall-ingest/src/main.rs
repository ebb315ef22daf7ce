//! Appinstall Loader - load app-install logs into memcached

use anyhow::{bail, Context, Result};
use appinstall_common::logging::{init_logging, LogConfig, LogLevel};
use appinstall_ingest::config::LoaderConfig;
use appinstall_ingest::pipeline::{discover, InputFile, Pipeline, RunSummary};
use appinstall_ingest::store::{DryRunConnector, MemcacheConnector, StoreConnector};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "appinstall-ingest")]
#[command(author, version, about = "Load app-install logs into partitioned memcached")]
struct Cli {
    /// Glob pattern of input files (overrides the config file)
    #[arg(short, long)]
    pattern: Option<String>,

    /// YAML configuration file
    #[arg(short, long, env = "APPINSTALL_CONFIG")]
    config: Option<PathBuf>,

    /// Log items instead of writing them; files are not renamed
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose || cli.dry_run {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("appinstall-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = LoaderConfig::load(cli.config.as_deref())?;
    if let Some(pattern) = cli.pattern {
        config.pattern = pattern;
    }
    if cli.dry_run {
        config.dry_run = true;
    }

    info!(pattern = %config.pattern, dry_run = config.dry_run, "Loader started");

    let files = discover(&config.pattern)?;
    let summary = if files.is_empty() {
        info!(pattern = %config.pattern, "No files found");
        RunSummary::default()
    } else {
        load(&config, files).await?
    };

    if let Some(path) = &cli.summary_json {
        write_summary(path, &summary)?;
    }

    report(&summary, config.max_error_rate)
}

async fn load(config: &LoaderConfig, files: Vec<InputFile>) -> Result<RunSummary> {
    let connector: Arc<dyn StoreConnector> = if config.dry_run {
        Arc::new(DryRunConnector)
    } else {
        Arc::new(MemcacheConnector::new(config.connect_timeout()))
    };

    let pipeline = Pipeline::new(config.pipeline_config()?, connector);

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    Ok(pipeline.run(files).await)
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
    info!(path = %path.display(), "Run summary written");
    Ok(())
}

fn report(summary: &RunSummary, max_error_rate: f64) -> Result<()> {
    let rate = summary.error_rate().unwrap_or(0.0);

    if summary.is_acceptable(max_error_rate) {
        info!(error_rate = rate, max_error_rate, "Acceptable error rate, load successful");
    } else {
        error!(error_rate = rate, max_error_rate, "High error rate, load failed");
    }

    println!(
        "files: {} completed, {} failed, {} unfinished | lines: {} read, {} dropped | items: {} written, {} failed",
        summary.files_completed,
        summary.files_failed,
        summary.files_unfinished,
        summary.lines_read,
        summary.dropped.total(),
        summary.items_written,
        summary.items_failed,
    );

    if !summary.is_acceptable(max_error_rate) {
        bail!(
            "error rate {:.4} exceeds the maximum of {:.4}",
            rate,
            max_error_rate
        );
    }
    if summary.cancelled {
        bail!("run cancelled before all files were loaded");
    }

    Ok(())
}
