//! texpack CLI

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use texpack_cli::ui::ConsoleReporter;
use texpack_cli::{Cli, load_config};
use texpack_core::{Pipeline, ProcessLauncher, Reporter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = load_config(&cli, &cwd)?;
    tracing::debug!(?config, "config loaded");

    let reporter = Arc::new(ConsoleReporter::new());
    let pipeline = Pipeline::new(Arc::new(config), Arc::new(ProcessLauncher), reporter.clone());

    let report = pipeline.run().await.context("Asset build failed")?;

    reporter.summary(
        report.invocations,
        report.issues.len(),
        report.elapsed.as_secs_f64(),
    );
    reporter.success("Done!");
    Ok(())
}
