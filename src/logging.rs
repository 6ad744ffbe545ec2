//! Tracing subscriber setup for the CLI.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "GSD_LOG";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Also write daily-rolling log files here
    pub log_dir: Option<PathBuf>,
}

impl LogOptions {
    /// Filter used when `GSD_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "warn" }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

/// Install the global subscriber.
///
/// Console output goes to stderr so stdout stays free for event output.
/// The returned guard must be held until exit for file logs to flush.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if options.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(options.filter())
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(options.filter())
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(dir) = &options.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "gsd.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(options.filter())
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
