//! Logging setup for the cowork CLI.
//!
//! Stderr gets `COWORK_LOG` (default `warn`); `COWORK_DEBUG_LOG=1` forces
//! `debug`. A daily rolling file under `~/.cowork/logs/` always records
//! `debug` and above. If the file cannot be opened, stderr logging still works.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_ENV: &str = "COWORK_LOG";
const DEBUG_ENV: &str = "COWORK_DEBUG_LOG";

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(filter);

    let (file_layer, guard) = match logs_dir.and_then(file_appender) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

fn file_appender(logs_dir: &Path) -> Option<RollingFileAppender> {
    std::fs::create_dir_all(logs_dir).ok()?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("cowork")
        .filename_suffix("log")
        .max_log_files(14)
        .build(logs_dir)
        .ok()
}
