use std::path::{Path, PathBuf};

use git2::Repository;

/// Resolved on-disk layout of one repository. Computed once, read-only after.
///
/// For a linked worktree `.git` is a file pointing at
/// `<main>/.git/worktrees/<name>`; HEAD and index live there while config,
/// refs and packed-refs live in the shared common dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPathConfiguration {
    pub repository_path: PathBuf,
    pub dot_git_path: PathBuf,
    pub git_dir: PathBuf,
    pub common_dir: PathBuf,
    pub is_worktree: bool,
}

impl RepositoryPathConfiguration {
    /// Layout of the working tree at `repository_path`. A directory libgit2
    /// cannot open is assumed to be a plain `.git` layout.
    pub fn new(repository_path: impl Into<PathBuf>) -> Self {
        let repository_path = repository_path.into();
        let dot_git_path = repository_path.join(".git");

        let (git_dir, common_dir, is_worktree) = match Repository::open(&repository_path) {
            Ok(repo) => (
                repo.path().to_path_buf(),
                repo.commondir().to_path_buf(),
                repo.is_worktree(),
            ),
            Err(e) => {
                tracing::debug!(target: "gitkeeper.repository", path = %repository_path.display(), error = %e, "not an open-able repository");
                (dot_git_path.clone(), dot_git_path.clone(), false)
            }
        };

        Self {
            repository_path,
            dot_git_path,
            git_dir,
            common_dir,
            is_worktree,
        }
    }

    /// Working tree of the repository containing `start`; `None` outside
    /// a repository or for a bare one.
    pub fn discover(start: &Path) -> Option<Self> {
        let repo = Repository::discover(start).ok()?;
        repo.workdir().map(Self::new)
    }

    /// Whether `path` is repository metadata rather than working tree.
    pub fn is_git_path(&self, path: &Path) -> bool {
        path.starts_with(&self.git_dir)
            || path.starts_with(&self.common_dir)
            || path == self.dot_git_path
    }

    /// `/`-separated path relative to the git dir (or the common dir).
    pub fn git_relative(&self, path: &Path) -> Option<String> {
        let rel = path
            .strip_prefix(&self.git_dir)
            .or_else(|_| path.strip_prefix(&self.common_dir))
            .ok()?;
        Some(to_slash(rel))
    }

    /// `/`-separated path relative to the working tree root.
    pub fn work_tree_relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.repository_path).ok().map(to_slash)
    }
}

fn to_slash(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
