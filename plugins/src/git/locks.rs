//! `git lfs locks --json` output.

use chrono::{DateTime, Utc};
use gitkeeper_core::error::ParseError;
use gitkeeper_core::git::GitLock;
use gitkeeper_core::process::OutputProcessor;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LfsOwner {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LfsLock {
    id: String,
    path: String,
    owner: Option<LfsOwner>,
    locked_at: Option<DateTime<Utc>>,
}

impl From<LfsLock> for GitLock {
    fn from(l: LfsLock) -> Self {
        GitLock {
            id: l.id,
            path: l.path,
            owner: l.owner.map(|o| o.name).unwrap_or_default(),
            locked_at: l.locked_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct LocksOutputProcessor {
    json: String,
}

impl LocksOutputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProcessor for LocksOutputProcessor {
    type Output = Vec<GitLock>;

    fn line_received(&mut self, line: &str) -> Result<(), ParseError> {
        self.json.push_str(line);
        self.json.push('\n');
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<GitLock>, ParseError> {
        let json = std::mem::take(&mut self.json);
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        let locks: Vec<LfsLock> = serde_json::from_str(&json)
            .map_err(|e| ParseError::new(format!("lfs locks json: {e}")))?;
        Ok(locks.into_iter().map(GitLock::from).collect())
    }
}
