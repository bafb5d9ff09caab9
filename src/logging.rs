//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How much logging machinery a subcommand needs.
pub enum LogMode<'a> {
    /// JSON file layer with daily rotation plus stderr, for `start`.
    Production {
        /// Directory for the rotated log files.
        logs_dir: &'a Path,
    },
    /// Stderr only, for one-shot subcommands.
    Cli,
}

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes pending entries and closes the file, so hold
/// it for the lifetime of the process.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialise the global subscriber for the given mode.
///
/// Output level is controlled by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init(mode: LogMode<'_>) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match mode {
        LogMode::Production { logs_dir } => {
            std::fs::create_dir_all(logs_dir).map_err(|e| {
                anyhow::anyhow!("failed to create logs directory {}: {e}", logs_dir.display())
            })?;

            let file_appender = tracing_appender::rolling::daily(logs_dir, "hornbill.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking);
            let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .with(console_layer)
                .init();
            Ok(LoggingGuard {
                _guard: Some(guard),
            })
        }
        LogMode::Cli => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(LoggingGuard { _guard: None })
        }
    }
}
