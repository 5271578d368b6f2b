mod cli;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use closecast_forecast::run_pipeline;
use closecast_rs::PipelineConfig;
use cli::Cli;
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, prelude::*};

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("failed to create log directory {parent:?}: {err}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| anyhow!("failed to open log file {path:?}: {err}"))?;
        let (non_blocking_writer, guard) = non_blocking(file);
        // Leaked so buffered lines are flushed for the whole process lifetime.
        let _guard = Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    }
}

fn log_invocation(config: &PipelineConfig, log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    tracing::info!("==================== new closecast run ====================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        input = %config.input_csv.display(),
        output_dir = %config.output_dir.display(),
        log_file = ?log_file,
        "closecast invoked"
    );
}

fn main() -> Result<()> {
    let _cli = Cli::parse();
    let config = PipelineConfig::default();

    let log_file = config.file_log.then(|| config.log_path());
    init_tracing(log_file.as_deref())?;
    log_invocation(&config, log_file.as_ref());

    let summary = run_pipeline(&config)?;
    tracing::info!(
        cleaned = %summary.cleaned_csv.display(),
        charts = summary.charts.len(),
        warnings = summary.warnings.len(),
        "closecast finished"
    );
    Ok(())
}
