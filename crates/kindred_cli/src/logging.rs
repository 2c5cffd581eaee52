use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub struct LogOptions {
    pub dir: Option<PathBuf>,
    pub verbose: bool,
    pub json: bool,
}

/// `<data dir>/kindred/logs`, or `./logs` when the platform has no data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kindred").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Install the global subscriber: a daily-rolling file, plus stderr with
/// `verbose`. Keep the returned guard alive or buffered lines are lost.
pub fn init(opts: &LogOptions) -> Result<WorkerGuard> {
    let dir = opts.dir.clone().unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(&dir, "kindred.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer: Box<dyn Layer<Registry> + Send + Sync> = if opts.json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    };
    let stderr_layer = opts
        .verbose
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging to {}", dir.display());
    Ok(guard)
}
