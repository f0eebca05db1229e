use std::path::PathBuf;

use thiserror::Error;

use super::task::TaskError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("task failed: {0}")]
    Task(#[from] TaskError),
    #[error("watcher failed: {0}")]
    Watcher(#[from] WatcherError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum WatcherError {
    /// `check_and_process_events` was called from inside one of its own observers.
    #[error("check_and_process_events called re-entrantly")]
    Reentrant,
    #[error("watcher not initialized")]
    NotInitialized,
    #[error("notify error on {path}: {message}")]
    Notify { path: PathBuf, message: String },
}

/// Failures reading repository metadata (HEAD, refs, config) through libgit2.
#[derive(Error, Debug)]
pub enum GitConfigError {
    #[error("no git repository at {path}: {source}")]
    NotARepository {
        path: PathBuf,
        source: git2::Error,
    },
    #[error("git metadata read failed: {0}")]
    Git(#[from] git2::Error),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings value for '{key}' is invalid: {source}")]
    Value {
        key: String,
        source: serde_json::Error,
    },
}

/// Raised by an output processor that cannot interpret a line of output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
