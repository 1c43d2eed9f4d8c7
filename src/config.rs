//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then `{data_dir}/config.json` if it
//! exists, then environment variables (`POS_DATA_DIR`, `POS_LOG_DIR`,
//! `POS_LOG`, `POS_UTC_OFFSET_MINUTES`).

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PosError, PosResult};

pub const CONFIG_FILE: &str = "config.json";
const DEFAULT_LOG_FILTER: &str = "info,tableside_pos=debug";
const DEFAULT_FEED_CAPACITY: usize = 64;
const DEFAULT_MAX_LOG_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PosConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_filter: String,
    /// Offset used to bucket sales and expenses into calendar days.
    pub utc_offset_minutes: i32,
    /// Buffered snapshots per change-feed subscriber before it lags.
    pub feed_capacity: usize,
    pub max_log_files: usize,
}

impl Default for PosConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            log_dir: data_dir.join("logs"),
            data_dir,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            utc_offset_minutes: 0,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            max_log_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

/// Keys accepted in `config.json`. Anything absent keeps its current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileOverrides {
    log_dir: Option<PathBuf>,
    log_filter: Option<String>,
    utc_offset_minutes: Option<i32>,
    feed_capacity: Option<usize>,
    max_log_files: Option<usize>,
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        })
        .join("tableside-pos")
}

impl PosConfig {
    /// Defaults rooted at `data_dir`, logs under `data_dir/logs`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            log_dir: data_dir.join("logs"),
            data_dir,
            ..Self::default()
        }
    }

    /// Load configuration from defaults, the optional config file and the
    /// environment.
    pub fn load() -> PosResult<Self> {
        let mut config = match env_nonempty("POS_DATA_DIR") {
            Some(dir) => Self::with_data_dir(dir),
            None => Self::default(),
        };

        let file = config.data_dir.join(CONFIG_FILE);
        if file.exists() {
            config.apply_file(&file)?;
        }

        config.apply_env()?;
        config.validate()?;
        info!(
            data_dir = %config.data_dir.display(),
            log_dir = %config.log_dir.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Overlay values from a JSON config file.
    pub fn apply_file(&mut self, path: &Path) -> PosResult<()> {
        let raw = fs::read_to_string(path)?;
        let file: FileOverrides = serde_json::from_str(&raw).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Config file parse failed");
            PosError::Config(format!("{}: {e}", path.display()))
        })?;
        if let Some(dir) = file.log_dir {
            self.log_dir = dir;
        }
        if let Some(filter) = file.log_filter {
            self.log_filter = filter;
        }
        if let Some(offset) = file.utc_offset_minutes {
            self.utc_offset_minutes = offset;
        }
        if let Some(capacity) = file.feed_capacity {
            self.feed_capacity = capacity;
        }
        if let Some(max) = file.max_log_files {
            self.max_log_files = max;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> PosResult<()> {
        if let Some(dir) = env_nonempty("POS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(filter) = env_nonempty("POS_LOG") {
            self.log_filter = filter;
        }
        if let Some(raw) = env_nonempty("POS_UTC_OFFSET_MINUTES") {
            self.utc_offset_minutes = raw.trim().parse().map_err(|_| {
                PosError::Config(format!("POS_UTC_OFFSET_MINUTES is not an integer: {raw}"))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> PosResult<()> {
        self.utc_offset()?;
        if self.feed_capacity == 0 {
            return Err(PosError::Config("feedCapacity must be positive".into()));
        }
        Ok(())
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("pos.db")
    }

    pub fn utc_offset(&self) -> PosResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            PosError::Config(format!(
                "utcOffsetMinutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
