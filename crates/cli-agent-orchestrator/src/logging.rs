//! Tracing setup: stderr always; a per-task log file for `run`.

use std::path::Path;

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stderr-only logging for inspection commands.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Stderr plus a non-blocking file appender under the task directory
/// (`<task-dir>/logs/run-<timestamp>.log`).
///
/// The returned guard must stay alive for the duration of the run.
pub fn init_task_logging(task_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = task_dir.join(cao_config::paths::TASK_LOGS_DIR);
    std::fs::create_dir_all(&log_dir)?;

    let file_name = format!("run-{}.log", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
    let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .ok();

    Ok(guard)
}
