//! Tracing setup: console output plus a daily rolling log file.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::PosConfig;
use crate::error::PosResult;

const LOG_FILE_PREFIX: &str = "pos";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. The returned guard must be
/// kept alive for the file writer to flush. Calling this twice is harmless:
/// the second registration is ignored.
pub fn init(config: &PosConfig) -> PosResult<WorkerGuard> {
    fs::create_dir_all(&config.log_dir)?;
    prune_old_logs(&config.log_dir, config.max_log_files);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        warn!("Global tracing subscriber already installed");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %config.log_dir.display(),
        "Logging initialized"
    );
    Ok(guard)
}

/// Keep only the newest `keep` log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path, keep: usize) {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
