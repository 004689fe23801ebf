//! Tracing setup.
//!
//! Logs go to daily files under `$COHORT_HOME/logs` so stdout stays free
//! for the transcript. The filter comes from `COHORT_LOG` (falling back to
//! `RUST_LOG`, then `warn`).

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "COHORT_LOG";

const DEFAULT_DIRECTIVES: &str = "warn";

/// Installs the global subscriber writing to `log_dir`.
///
/// Keep the returned guard alive for the lifetime of the process; dropping
/// it flushes and stops the background writer.
///
/// # Errors
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "cohort.log"));

    tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(env_filter())
        .try_init()
        .context("install tracing subscriber")?;

    tracing::debug!(path = %log_dir.display(), "tracing initialized");
    Ok(guard)
}

fn env_filter() -> EnvFilter {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}
