//! Tracing setup for the CLI.
//!
//! Events go to the systemd journal when one is reachable, otherwise to a
//! daily-rolling file under the configured log directory.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "WIDESIGHT_LOG";

const DEFAULT_DIRECTIVES: &str = "widesight=info,warn";
const LOG_FILE_PREFIX: &str = "widesight.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where events ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Journald,
    File(PathBuf),
}

/// Filter from `WIDESIGHT_LOG`, falling back to info for this crate and
/// warn for dependencies.
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn resolve_log_dir(log_dir: Option<PathBuf>) -> PathBuf {
    log_dir.unwrap_or_else(|| {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("widesight")
            .join("logs")
    })
}

#[cfg(target_os = "linux")]
fn journald_layer() -> Option<tracing_journald::Layer> {
    tracing_journald::layer().ok()
}

#[cfg(not(target_os = "linux"))]
fn journald_layer() -> Option<tracing_subscriber::layer::Identity> {
    None
}

/// Install the global subscriber.
///
/// Fails when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init(log_dir: Option<PathBuf>) -> Result<LogSink> {
    let filter = filter_from(std::env::var(LOG_ENV).ok().as_deref());

    if let Some(journald) = journald_layer() {
        tracing_subscriber::registry()
            .with(filter)
            .with(journald)
            .try_init()
            .context("Failed to install journald subscriber")?;
        return Ok(LogSink::Journald);
    }

    let dir = resolve_log_dir(log_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX));
    if FILE_GUARD.set(guard).is_err() {
        bail!("File logging is already initialized");
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("Failed to install file subscriber")?;

    tracing::debug!(dir = %dir.display(), "File logging started");
    Ok(LogSink::File(dir))
}
