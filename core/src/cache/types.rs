use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheType {
    Branches,
    GitStatus,
    GitLog,
    GitFileLog,
    GitLocks,
    GitUser,
    GitAheadBehind,
    RepositoryInfo,
}

impl CacheType {
    pub const ALL: [CacheType; 8] = [
        CacheType::Branches,
        CacheType::GitStatus,
        CacheType::GitLog,
        CacheType::GitFileLog,
        CacheType::GitLocks,
        CacheType::GitUser,
        CacheType::GitAheadBehind,
        CacheType::RepositoryInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::Branches => "branches",
            CacheType::GitStatus => "git_status",
            CacheType::GitLog => "git_log",
            CacheType::GitFileLog => "git_file_log",
            CacheType::GitLocks => "git_locks",
            CacheType::GitUser => "git_user",
            CacheType::GitAheadBehind => "git_ahead_behind",
            CacheType::RepositoryInfo => "repository_info",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cached payload with its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub last_updated: Option<DateTime<Utc>>,
    /// Set while a refresh is in flight; cleared by an update or a reset.
    #[serde(skip)]
    pub needs_validation: bool,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Never updated, or older than its timeout at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (self.last_updated, self.timeout) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(timeout)) => chrono::Duration::from_std(timeout)
                .map(|t| at + t < now)
                .unwrap_or(false),
        }
    }
}

/// Immutable marker of one cache update; observers compare timestamps to
/// decide whether their view is out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheUpdateEvent {
    pub cache_type: CacheType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(CacheUpdateEvent),
    Invalidated(CacheType),
}

impl CacheEvent {
    pub fn cache_type(&self) -> CacheType {
        match self {
            CacheEvent::Updated(e) => e.cache_type,
            CacheEvent::Invalidated(t) => *t,
        }
    }
}
