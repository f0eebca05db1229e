use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-letter status as printed by `git status --porcelain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GitFileStatus {
    #[default]
    None,
    Untracked,
    Ignored,
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Unmerged,
    TypeChange,
}

impl GitFileStatus {
    pub fn from_porcelain(c: char) -> Self {
        match c {
            '?' => Self::Untracked,
            '!' => Self::Ignored,
            'M' => Self::Modified,
            'A' => Self::Added,
            'D' => Self::Deleted,
            'R' => Self::Renamed,
            'C' => Self::Copied,
            'U' => Self::Unmerged,
            'T' => Self::TypeChange,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitStatusEntry {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub full_path: PathBuf,
    pub original_path: Option<String>,
    pub index_status: GitFileStatus,
    pub work_tree_status: GitFileStatus,
}

impl GitStatusEntry {
    pub fn new(
        repository_root: &std::path::Path,
        path: impl Into<String>,
        index_status: GitFileStatus,
        work_tree_status: GitFileStatus,
    ) -> Self {
        let path = path.into();
        Self {
            full_path: repository_root.join(&path),
            path,
            original_path: None,
            index_status,
            work_tree_status,
        }
    }

    /// Effective status: the work tree side when it differs from the index,
    /// otherwise the staged side.
    pub fn status(&self) -> GitFileStatus {
        if self.work_tree_status != GitFileStatus::None {
            self.work_tree_status
        } else {
            self.index_status
        }
    }

    pub fn is_staged(&self) -> bool {
        !matches!(
            self.index_status,
            GitFileStatus::None | GitFileStatus::Untracked | GitFileStatus::Ignored
        )
    }

    /// Entries with no committed counterpart; discarding them means deleting.
    pub fn has_no_committed_version(&self) -> bool {
        matches!(self.status(), GitFileStatus::Added | GitFileStatus::Untracked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitStatus {
    pub local_branch: Option<String>,
    pub remote_branch: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub entries: Vec<GitStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLogEntry {
    pub commit_id: String,
    pub author_name: String,
    pub author_email: String,
    pub time: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub changes: Vec<GitStatusEntry>,
}

impl GitLogEntry {
    pub fn short_id(&self) -> &str {
        let end = self
            .commit_id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.commit_id.len());
        &self.commit_id[..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitFileLog {
    pub path: String,
    pub entries: Vec<GitLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLock {
    pub id: String,
    pub path: String,
    pub owner: String,
    pub locked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitAheadBehindStatus {
    pub ahead: u32,
    pub behind: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitBranch {
    pub name: String,
    pub tracking: Option<String>,
    pub is_active: bool,
}

/// `[branch "<name>"]` section of git config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBranch {
    pub name: String,
    pub remote: Option<String>,
    pub merge: Option<String>,
}

impl ConfigBranch {
    /// A branch with no config section, e.g. freshly created or detached.
    pub fn unconfigured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: None,
            merge: None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.remote.is_some()
    }

    /// `<remote>/<branch>` of the upstream, when tracking is configured.
    pub fn tracking_ref(&self) -> Option<String> {
        let remote = self.remote.as_deref()?;
        let merge = self.merge.as_deref()?;
        let branch = merge.strip_prefix("refs/heads/").unwrap_or(merge);
        Some(format!("{remote}/{branch}"))
    }
}

/// `[remote "<name>"]` section of git config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRemote {
    pub name: String,
    pub url: Option<String>,
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchesData {
    pub local: Vec<GitBranch>,
    pub remote: Vec<GitBranch>,
    pub config_branches: BTreeMap<String, ConfigBranch>,
    /// In the order libgit2 lists them.
    pub config_remotes: Vec<ConfigRemote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeadState {
    Branch(String),
    Detached(String),
    #[default]
    Unknown,
}

impl HeadState {
    pub fn branch_name(&self) -> Option<&str> {
        match self {
            Self::Branch(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub head: HeadState,
    pub current_branch: Option<ConfigBranch>,
    pub current_remote: Option<ConfigRemote>,
    /// Commit the current branch (or detached HEAD) points at, when known.
    pub current_head: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl GitVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: 0,
        }
    }

    /// Parse the first dotted version number in `text`, e.g.
    /// `git version 2.39.3 (Apple Git-145)` or `git-lfs/3.4.0 (GitHub; ...)`.
    pub fn parse(text: &str) -> Option<Self> {
        lazy_static::lazy_static! {
            static ref VERSION_RE: regex::Regex =
                regex::Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("valid version regex");
        }
        let caps = VERSION_RE.captures(text)?;
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Some(Self {
            major: num(1),
            minor: num(2),
            patch: num(3),
            build: num(4),
        })
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn versions_parse_from_tool_banners() {
        assert_eq!(
            GitVersion::parse("git version 2.39.3 (Apple Git-145)"),
            Some(GitVersion::new(2, 39, 3))
        );
        let win = GitVersion::parse("git version 2.42.0.windows.2").unwrap();
        assert_eq!(win, GitVersion::new(2, 42, 0));
        assert_eq!(
            GitVersion::parse("git-lfs/3.4.0 (GitHub; linux amd64; go 1.21.1)"),
            Some(GitVersion::new(3, 4, 0))
        );
        assert!(GitVersion::parse("git version unknown").is_none());
        assert!(GitVersion::new(2, 11, 0) < GitVersion::new(2, 39, 3));
    }

    #[test]
    fn status_prefers_work_tree_side() {
        let root = Path::new("/repo");
        let staged_new = GitStatusEntry::new(root, "a.txt", GitFileStatus::Added, GitFileStatus::None);
        assert!(staged_new.has_no_committed_version());
        assert!(staged_new.is_staged());

        let modified = GitStatusEntry::new(root, "b.txt", GitFileStatus::Added, GitFileStatus::Modified);
        assert_eq!(modified.status(), GitFileStatus::Modified);
        assert!(!modified.has_no_committed_version());
        assert_eq!(modified.full_path, Path::new("/repo/b.txt"));
    }

    #[test]
    fn tracking_ref_strips_heads_prefix() {
        let b = ConfigBranch {
            name: "main".into(),
            remote: Some("origin".into()),
            merge: Some("refs/heads/main".into()),
        };
        assert_eq!(b.tracking_ref().as_deref(), Some("origin/main"));
        assert_eq!(ConfigBranch::unconfigured("x").tracking_ref(), None);
    }
}
