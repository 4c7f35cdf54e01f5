//! Fraud Detection Pipeline - Main Entry Point

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pipeline::{init_logging, Orchestrator, PipelineConfig, PipelineStages, StepSelector};
use std::path::PathBuf;
use std::process::ExitCode;
use storage::ModelRegistry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fraud-pipeline", version, about = "Fraud detection batch pipeline")]
struct Cli {
    /// Step to run: 1 load, 2 transform, 3 train, 4 predict, or `all`
    #[arg(long, default_value = "all")]
    step: StepSelector,

    /// Print the latest model's metrics report after the run
    #[arg(long)]
    show_metrics: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn show_metrics(registry: &ModelRegistry) -> Result<()> {
    let version = registry
        .latest_version()?
        .ok_or_else(|| anyhow!("no trained model in {}", registry.dir().display()))?;
    let metrics = registry
        .load_metrics(version)
        .with_context(|| format!("Failed to load metrics for model v{version}"))?;
    println!("{metrics}");
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging.level, config.logging.json())?;

    info!("=== Fraud Detection Pipeline v{} ===", env!("CARGO_PKG_VERSION"));

    let stages = PipelineStages::open(config)
        .await
        .context("Failed to open pipeline stores")?;
    let mut orchestrator = Orchestrator::new(stages);
    orchestrator.run(cli.step).await?;

    if cli.show_metrics {
        show_metrics(orchestrator.runner().registry())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fraud-pipeline: {e:#}");
            ExitCode::FAILURE
        }
    }
}
