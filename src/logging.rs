//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Service** ([`init_service`]): console layer, plus a daily-rotated JSON
//!   file layer when a log directory is configured
//! - **CLI** ([`init_cli`]): console-only for one-shot subcommands like `check`

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of rotated log files.
pub const LOG_FILE_PREFIX: &str = "cpthook.log";

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
#[derive(Debug)]
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// Build the level filter: `RUST_LOG` wins, else `default_level`.
///
/// An unparsable `default_level` falls back to `info`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise logging for the `run` subcommand.
///
/// With `logs_dir` set, writes JSON logs to `{logs_dir}/cpthook.log.YYYY-MM-DD`
/// with daily rotation. Always emits human-readable output to stderr.
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_service(default_level: &str, logs_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let Some(logs_dir) = logs_dir else {
        tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(LoggingGuard { _guard: None });
    };

    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(json_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard {
        _guard: Some(guard),
    })
}

/// Initialise minimal logging for one-shot subcommands.
///
/// Emits human-readable output to stderr only. No file rotation.
pub fn init_cli(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}
