use std::sync::Mutex;

use super::manager::RepositoryManager;
use crate::cache::{CacheObserverView, CacheType, CacheUpdateEvent};
use crate::git::{
    BranchesData, ConfigBranch, ConfigRemote, GitAheadBehindStatus, GitLock, GitLogEntry,
    GitStatus, GitStatusEntry, GitUser,
};
use crate::task::Task;
use crate::util::lock;

/// Read-side view of one repository for a UI consumer.
///
/// Each facade keeps its own [`CacheObserverView`], so several consumers can
/// attach at different times and each is told about a cache update once.
pub struct Repository {
    manager: RepositoryManager,
    view: Mutex<CacheObserverView>,
}

impl Repository {
    pub fn new(manager: RepositoryManager) -> Self {
        Self {
            manager,
            view: Mutex::new(CacheObserverView::new()),
        }
    }

    pub fn manager(&self) -> &RepositoryManager {
        &self.manager
    }

    pub fn local_path(&self) -> &std::path::Path {
        &self.manager.paths().repository_path
    }

    pub fn is_busy(&self) -> bool {
        self.manager.is_busy()
    }

    pub fn current_branch(&self) -> Option<ConfigBranch> {
        self.manager.container().repository_info().data.current_branch
    }

    pub fn current_remote(&self) -> Option<ConfigRemote> {
        self.manager.container().repository_info().data.current_remote
    }

    pub fn current_head(&self) -> Option<String> {
        self.manager.container().repository_info().data.current_head
    }

    pub fn status(&self) -> GitStatus {
        self.manager.container().git_status().data
    }

    pub fn log(&self) -> Vec<GitLogEntry> {
        self.manager.container().git_log().data
    }

    pub fn branches(&self) -> BranchesData {
        self.manager.container().branches().data
    }

    pub fn locks(&self) -> Vec<GitLock> {
        self.manager.container().git_locks().data
    }

    pub fn user(&self) -> GitUser {
        self.manager.container().git_user().data
    }

    pub fn ahead_behind(&self) -> GitAheadBehindStatus {
        self.manager.container().git_ahead_behind().data
    }

    /// The cache's update event if this facade has not seen it yet.
    pub fn check_and_raise_events_if_cache_newer(
        &self,
        cache_type: CacheType,
    ) -> Option<CacheUpdateEvent> {
        lock(&self.view).poll(self.manager.container(), cache_type)
    }

    /// Every cache update this facade has not seen yet.
    pub fn pending_cache_events(&self) -> Vec<CacheUpdateEvent> {
        lock(&self.view).poll_all(self.manager.container())
    }

    pub fn commit_all_files(&self, message: &str, body: Option<&str>) -> Task<String> {
        self.manager.commit_all_files(message, body)
    }

    pub fn commit_files(&self, files: &[String], message: &str, body: Option<&str>) -> Task<String> {
        self.manager.commit_files(files, message, body)
    }

    pub fn push(&self) -> Task<String> {
        self.manager.push(None, None)
    }

    pub fn pull(&self) -> Task<String> {
        self.manager.pull(None, None)
    }

    pub fn fetch(&self) -> Task<String> {
        self.manager.fetch(None)
    }

    pub fn revert(&self, commit_id: &str) -> Task<String> {
        self.manager.revert(commit_id)
    }

    pub fn create_branch(&self, branch: &str, base: &str) -> Task<String> {
        self.manager.create_branch(branch, base)
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Task<String> {
        self.manager.delete_branch(branch, force)
    }

    pub fn switch_branch(&self, branch: &str) -> Task<String> {
        self.manager.switch_branch(branch)
    }

    pub fn request_lock(&self, file: &str) -> Task<String> {
        self.manager.lock_file(file)
    }

    pub fn release_lock(&self, file: &str, force: bool) -> Task<String> {
        self.manager.unlock_file(file, force)
    }

    pub fn discard_changes(&self, entries: &[GitStatusEntry]) -> Task<String> {
        self.manager.discard_changes(entries)
    }

    pub fn discard_all_changes(&self) -> Task<String> {
        self.manager.discard_all_changes()
    }

    pub fn checkout_version(&self, commit_id: &str, files: &[String]) -> Task<String> {
        self.manager.checkout_files(commit_id, files)
    }

    pub fn remote_add(&self, name: &str, url: &str) -> Task<String> {
        self.manager.remote_add(name, url)
    }

    pub fn remote_remove(&self, name: &str) -> Task<String> {
        self.manager.remote_remove(name)
    }

    /// Cached locks held by someone other than the configured user.
    pub fn locks_held_by_others(&self) -> Vec<GitLock> {
        let me = self.user().name;
        self.locks()
            .into_iter()
            .filter(|l| me.as_deref() != Some(l.owner.as_str()))
            .collect()
    }
}

impl From<RepositoryManager> for Repository {
    fn from(manager: RepositoryManager) -> Self {
        Self::new(manager)
    }
}

impl Clone for Repository {
    /// A clone shares the manager but starts with a fresh observer view.
    fn clone(&self) -> Self {
        Self::new(self.manager.clone())
    }
}
