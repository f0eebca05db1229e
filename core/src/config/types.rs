use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub git: GitToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "gitkeeper_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent lane size. Unset means one worker per available core.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
}

fn default_progress_channel_capacity() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            progress_channel_capacity: default_progress_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Install OS filesystem notifications. When off, hosts feed changes
    /// through the watcher's change feed themselves.
    #[serde(default = "default_watcher_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_watcher_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_watcher_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Staleness threshold for the LFS locks cache.
    #[serde(default = "default_locks_timeout_secs")]
    pub locks_timeout_secs: u64,

    /// Staleness threshold for every other cache; unset means never stale.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    #[serde(default = "default_cache_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_locks_timeout_secs() -> u64 {
    600
}

fn default_cache_event_capacity() -> usize {
    256
}

impl CacheConfig {
    pub fn timeout_for(&self, cache_type: CacheType) -> Option<Duration> {
        match cache_type {
            CacheType::GitLocks => Some(Duration::from_secs(self.locks_timeout_secs)),
            _ => self.default_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            locks_timeout_secs: default_locks_timeout_secs(),
            default_timeout_secs: None,
            event_channel_capacity: default_cache_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitToolConfig {
    /// Explicit git executable; looked up on PATH when unset.
    #[serde(default)]
    pub git_path: Option<String>,

    /// Explicit git-lfs executable; looked up on PATH when unset.
    #[serde(default)]
    pub lfs_path: Option<String>,

    /// JSON file holding persisted settings (installation state, cache
    /// timestamps).
    #[serde(default)]
    pub settings_file: Option<String>,
}
