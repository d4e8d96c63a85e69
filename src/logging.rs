//! Tracing bootstrap for hosts that do not bring their own subscriber.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::CoreConfig;

/// Keeps the non-blocking file writer alive; dropping it flushes and
/// stops the background logging thread.
pub struct LogGuard {
    _file_writer: Option<WorkerGuard>,
}

fn file_logs_enabled() -> bool {
    std::env::var("COACH_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Installs a stdout subscriber filtered by the configured level, plus a
/// daily-rolling file layer when `COACH_FILE_LOGS` is set.
pub fn init(config: &CoreConfig) -> LogGuard {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(true);

    let file_writer = if file_logs_enabled() {
        let dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, &dir, "coach-core.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(stdout)
                    .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
                    .init();
                return LogGuard {
                    _file_writer: Some(guard),
                };
            }
            Err(err) => {
                eprintln!("failed to create log directory {dir}: {err}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry().with(filter).with(stdout).init();
    LogGuard {
        _file_writer: file_writer,
    }
}
