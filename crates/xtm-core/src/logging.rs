//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter
pub const LOG_ENV_VAR: &str = "XTM_LOG";

const DEFAULT_FILTER: &str = "xtm_core=info,xtm_daemon=info,xtm_app=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/xctest-manager/logs/`.
/// Log level is controlled by the `XTM_LOG` environment variable, falling
/// back to `default_level` for the workspace crates when it is unset.
///
/// # Examples
/// ```bash
/// XTM_LOG=debug my-runner
/// XTM_LOG=xtm_daemon=trace my-runner
/// ```
pub fn init(default_level: Option<&str>) -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "xtm.log");

    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| crate::error::Error::config(format!("logging already initialized: {e}")))?;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("xctest-manager starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Build the filter directive used when `XTM_LOG` is unset
fn default_filter(level: Option<&str>) -> String {
    match level {
        Some(level) => format!("xtm_core={level},xtm_daemon={level},xtm_app={level},warn"),
        None => DEFAULT_FILTER.to_string(),
    }
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("xctest-manager").join("logs"))
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    Ok(dir.join("xtm.log"))
}
