use super::types::{GitAheadBehindStatus, GitFileLog, GitLock, GitLogEntry, GitStatus, GitUser};
use crate::task::Task;

/// Source of git data and mutations, as unstarted tasks.
///
/// Implementations decide argument and output grammars; the runtime only
/// composes, schedules and observes the returned chains. Reads should use
/// the Concurrent affinity and mutations the Exclusive one, so that mutating
/// operations never overlap.
pub trait GitClient: Send + Sync {
    fn status(&self) -> Task<GitStatus>;

    fn log(&self, limit: Option<usize>) -> Task<Vec<GitLogEntry>>;

    fn file_log(&self, path: &str) -> Task<GitFileLog>;

    fn ahead_behind(&self, local: &str, tracking: &str) -> Task<GitAheadBehindStatus>;

    fn list_locks(&self, remote: &str) -> Task<Vec<GitLock>>;

    fn user(&self) -> Task<GitUser>;

    fn add(&self, files: &[String]) -> Task<String>;

    fn add_all(&self) -> Task<String>;

    fn commit(&self, message: &str, body: Option<&str>) -> Task<String>;

    fn push(&self, remote: &str, branch: &str) -> Task<String>;

    fn pull(&self, remote: &str, branch: &str) -> Task<String>;

    fn fetch(&self, remote: &str) -> Task<String>;

    fn revert(&self, commit_id: &str) -> Task<String>;

    fn create_branch(&self, branch: &str, base: &str) -> Task<String>;

    fn delete_branch(&self, branch: &str, force: bool) -> Task<String>;

    fn switch_branch(&self, branch: &str) -> Task<String>;

    fn lock(&self, file: &str) -> Task<String>;

    fn unlock(&self, file: &str, force: bool) -> Task<String>;

    /// Restore tracked files to their committed content.
    fn discard(&self, files: &[String]) -> Task<String>;

    /// Restore every tracked file in the work tree.
    fn discard_all(&self) -> Task<String>;

    fn checkout_version(&self, commit_id: &str, files: &[String]) -> Task<String>;

    fn remote_add(&self, name: &str, url: &str) -> Task<String>;

    fn remote_remove(&self, name: &str) -> Task<String>;
}
