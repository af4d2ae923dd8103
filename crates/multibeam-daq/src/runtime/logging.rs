use std::path::Path;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,multibeam_daq=debug,multibeam_core=debug";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log directory {dir}: {reason}")]
    LogDir { dir: String, reason: String },
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Initialize the tracing subscriber with optional JSON output.
///
/// Events go through a non-blocking writer to stderr, or to a daily rolling
/// file under `log_dir`; stdout stays free for the status display. Keep the
/// returned guard alive until shutdown so buffered lines are flushed.
pub fn init_tracing(json_output: bool, log_dir: Option<&Path>) -> Result<WorkerGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("multibeam-daq")
                .filename_suffix("log")
                .build(dir)
                .map_err(|e| LoggingError::LogDir {
                    dir: dir.display().to_string(),
                    reason: e.to_string(),
                })?;
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let ansi = log_dir.is_none();

    let installed = if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_ansi(ansi).with_writer(writer))
            .try_init()
    };
    installed.map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;
    Ok(guard)
}
