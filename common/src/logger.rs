use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Installs the global `tracing` subscriber.
///
/// Logs go to a daily-rolling file under `log_dir`, and additionally to stdout
/// when `log_to_stdout` is set. The filter comes from `log_level` (an
/// `EnvFilter` directive such as `attendance=debug,util=info`).
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_logging(config: &AppConfig) -> io::Result<WorkerGuard> {
    fs::create_dir_all(&config.log_dir)?;

    let file_appender = rolling::daily(Path::new(&config.log_dir), &config.log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = config.log_to_stdout.then(|| {
        fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(true)
    });

    let env_filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("attendance=info"));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init();

    // A second init (e.g. from several tests) keeps the first subscriber.
    if installed.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
    Ok(guard)
}
