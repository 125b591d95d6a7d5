use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::sync::engine::{EngineError, SyncMode};

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_SYNC_DIR_NAME: &str = "Filebox";
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory is unavailable")]
    NoHome,
    #[error("FILEBOX_SYNC_MODE: {0}")]
    Mode(#[from] EngineError),
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub api_url: String,
    pub sync_dir: PathBuf,
    pub mode: SyncMode,
    pub watch_interval: Duration,
    pub log_level: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        let api_url =
            std::env::var("FILEBOX_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let sync_dir = std::env::var("FILEBOX_SYNC_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let mode = match std::env::var("FILEBOX_SYNC_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => SyncMode::UploadOnly,
        };
        let watch_interval = Duration::from_secs(read_u64_env(
            "FILEBOX_WATCH_INTERVAL_SECS",
            DEFAULT_WATCH_INTERVAL_SECS,
        ));
        let log_level =
            std::env::var("FILEBOX_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            api_url,
            sync_dir,
            mode,
            watch_interval,
            log_level,
            token: read_non_empty_env("FILEBOX_TOKEN"),
            username: read_non_empty_env("FILEBOX_USERNAME"),
            password: read_non_empty_env("FILEBOX_PASSWORD"),
        })
    }
}

pub fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
