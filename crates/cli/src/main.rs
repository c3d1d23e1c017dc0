use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notesheet_core::{
    load_config, metrics, validate_config, BatchDriver, BatchStatus, UploadItem,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Converts audio recordings into notes sheets with the configured worker.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NOTESHEET_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Job class passed to the worker (defaults to the configured one)
    #[arg(short, long)]
    job_class: Option<String>,

    /// Print Prometheus metrics to stderr after the batch
    #[arg(long)]
    metrics: bool,

    /// Audio files to convert, processed as one batch
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(status) => std::process::exit(exit_code(status)),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<BatchStatus> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!("notesheet {}", VERSION);

    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("Worker script: {:?}", config.worker.script);
    info!("Upload directory: {:?}", config.storage.upload_dir);

    let mut items = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        items.push(UploadItem::new(name, data));
    }

    let driver = BatchDriver::new(&config);
    let outcome = driver.run(items, cli.job_class.as_deref()).await;

    let json = serde_json::to_string_pretty(&outcome).context("Failed to encode outcome")?;
    println!("{}", json);

    if cli.metrics {
        let text = metrics::encode_metrics().context("Failed to encode metrics")?;
        eprintln!("{}", text);
    }

    Ok(outcome.status)
}

fn exit_code(status: BatchStatus) -> i32 {
    match status {
        BatchStatus::Success => 0,
        BatchStatus::Failure => 2,
        BatchStatus::PartialSuccess => 3,
    }
}
