//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
pub fn init() {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    registry().with(fmt_layer).init();
}

/// initiate the global tracing subscriber, additionally writing to a daily
/// rotated log file when `log_file` is given.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the program.
pub fn init_with_file<P: AsRef<Path>>(log_file: Option<P>) -> Result<Option<WorkerGuard>, InitError> {
    let Some(log_file) = log_file else {
        init();
        return Ok(None);
    };

    let (dir, prefix) = split_log_path(log_file.as_ref());
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());
    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    Ok(Some(file_guard))
}

/// Splits a log file path into the directory and the file name prefix used
/// by the rolling appender.
fn split_log_path(path: &Path) -> (&Path, String) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gpu-sim.log".to_string());
    (dir, prefix)
}
