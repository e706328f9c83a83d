use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt};

static LOGGING_INIT: OnceLock<()> = OnceLock::new();
static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Installs the global tracing subscriber described by `LoggingConfig`.
/// `LOCOMOTION_LOG` overrides the configured level. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    let level = std::env::var("LOCOMOTION_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.log_level.clone());
    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    // file sinks are always structured
    let json = config.json || config.log_path.is_some();
    let mut guard: Option<WorkerGuard> = None;
    let init_result = match &config.log_path {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {:?}", dir))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            let (writer, file_guard) = non_blocking(file);
            guard = Some(file_guard);
            builder.with_writer(writer).json().try_init()
        }
        None if json => builder.json().try_init(),
        None => builder.compact().try_init(),
    };
    init_result.map_err(|err| anyhow::anyhow!("failed to initialize logging: {err}"))?;
    LOGGING_INIT.set(()).ok();
    LOG_GUARD.set(guard).ok();

    info!(
        target: "locomotion_core::logging",
        level = level.as_str(),
        json,
        log_path = ?config.log_path,
        "logging initialized"
    );
    Ok(())
}
