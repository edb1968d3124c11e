//! Logging initialization and configuration.
//!
//! Operator status lines go to stdout; everything else is traced to a log
//! file so it never interleaves with the console. Each run writes its own
//! file in the `logs/` directory next to the executable, unless another
//! directory is given.
//!
//! # Configuration
//!
//! The log level can be controlled via the `RUST_LOG` environment variable:
//! - `RUST_LOG=debug` - Show every line moved between the link and the shell
//! - `RUST_LOG=info` - Show lifecycle events and commands (default)
//! - `RUST_LOG=warn` - Show timeouts, stale output and errors only

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "serial-bridge";

/// Initialize the logging system.
///
/// Each run creates a new log file with a timestamp, e.g.:
/// `logs/serial-bridge.2024-12-06-14-30-25.log`
///
/// Logging is best effort: if the directory or file cannot be created a
/// warning is printed and the bridge runs without a log.
///
/// # Returns
/// The guard flushing the non-blocking writer; keep it alive until exit
pub fn init_logging(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let log_dir = log_dir.unwrap_or_else(default_log_dir);

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        return None;
    }

    let log_path = log_file_path(&log_dir);
    let log_file = match fs::File::create(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Failed to create log file: {}", e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Warning: Logging already initialized: {}", e);
        return None;
    }

    tracing::info!("Logging initialized - writing to {}", log_path.display());
    Some(guard)
}

fn default_log_dir() -> PathBuf {
    match std::env::current_exe() {
        Ok(exe_path) => exe_path
            .parent()
            .map(|p| p.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs")),
        Err(_) => PathBuf::from("logs"),
    }
}

/// Format: serial-bridge.2024-12-06-14-30-25.log
fn log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    log_dir.join(format!("{LOG_FILE_PREFIX}.{timestamp}.log"))
}
