use thiserror::Error;

use crate::cache::CacheType;

/// Terminal failure of a task or chain.
///
/// Cloneable so the same fault can be offered to every catch handler, the
/// end hooks and the finally handlers of a chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("operation canceled")]
    Canceled,

    #[error("`{program}` exited with code {exit_code}: {stderr}")]
    Process {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to parse process output: {0}")]
    Parse(String),

    #[error("failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("refresh of {cache_type} failed: {message}")]
    Invalidation {
        cache_type: CacheType,
        message: String,
    },

    #[error("{0}")]
    Faulted(String),
}

impl TaskError {
    pub fn faulted(message: impl Into<String>) -> Self {
        Self::Faulted(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Map a task failure to a process exit code for command-line hosts.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Canceled => 130,
            Self::Process { .. } | Self::Spawn { .. } => 20,
            Self::Parse(_) | Self::Invalidation { .. } | Self::Faulted(_) => 30,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        Self::Faulted(format!("{e:#}"))
    }
}

impl From<super::ParseError> for TaskError {
    fn from(e: super::ParseError) -> Self {
        Self::Parse(e.0)
    }
}

impl From<super::GitConfigError> for TaskError {
    fn from(e: super::GitConfigError) -> Self {
        Self::Faulted(e.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        Self::Faulted(format!("io error: {e}"))
    }
}
