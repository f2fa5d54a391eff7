// Logging module - Logging infrastructure
use crate::domain::error::{BridgeError, BridgeResult};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the log file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard(Option<WorkerGuard>);

/// Default filter for a debug level: 0 notices, 1 open/close detail, 2 byte counts.
pub fn default_directive(debug: u8) -> &'static str {
    match debug {
        0 => "serbridge=info,warn",
        1 => "serbridge=debug,warn",
        _ => "serbridge=trace,info",
    }
}

/// Initialize logging system
///
/// Logs go to stderr, or to `log_file` when given (daemon mode detaches stderr).
/// `RUST_LOG` overrides the level chosen by `debug`.
pub fn init_logging(debug: u8, log_file: Option<&Path>) -> BridgeResult<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let (writer, guard) = match log_file {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                BridgeError::config(format!("Log file {} has no file name", path.display()))
            })?;
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy())
                .build(directory)
                .map_err(|e| {
                    BridgeError::config(format!("Failed to open log file {}: {}", path.display(), e))
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(log_file.is_none())
                .with_target(true)
                .with_level(true)
                .with_line_number(debug > 1),
        )
        .try_init()
        .map_err(|e| BridgeError::config(format!("Failed to initialize logging: {}", e)))?;

    let debug_level = debug;
    tracing::debug!(debug_level, "serbridge logging system initialized");
    Ok(LoggingGuard(guard))
}
