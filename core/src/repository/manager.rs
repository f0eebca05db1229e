use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use super::paths::RepositoryPathConfiguration;
use super::refs;
use super::watcher::{RepositoryWatcher, RepositoryWatcherEvent};
use crate::cache::{CacheContainer, CacheType, CacheUpdateEvent};
use crate::config::AppConfig;
use crate::error::{SettingsError, TaskError, WatcherError};
use crate::git::{
    BranchesData, ConfigBranch, ConfigRemote, GitAheadBehindStatus, GitBranch, GitClient,
    GitConfig, GitFileLog, GitLock, GitLogEntry, GitStatus, GitStatusEntry, GitUser, HeadState,
    RepositoryInfo,
};
use crate::settings::SettingsStore;
use crate::task::{Task, TaskAffinity, TaskContext, TaskHandle, TaskScheduler};
use crate::util::{lock, repository_key};

/// Typed notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RepositoryManagerEvent {
    GitStatusUpdated(GitStatus),
    GitLogUpdated(Vec<GitLogEntry>),
    GitFileLogUpdated(GitFileLog),
    LocalBranchesUpdated(Vec<GitBranch>),
    RemoteBranchesUpdated(Vec<GitBranch>),
    GitLocksUpdated(Vec<GitLock>),
    GitUserUpdated(GitUser),
    GitAheadBehindUpdated(GitAheadBehindStatus),
    CurrentBranchUpdated {
        branch: Option<ConfigBranch>,
        remote: Option<ConfigRemote>,
    },
    BusyChanged(bool),
}

/// Caches a watcher event makes stale.
///
/// Branch events also refresh GitLog even when the active branch did not
/// move; kept as is, callers rely on it.
pub fn caches_invalidated_by(event: RepositoryWatcherEvent) -> &'static [CacheType] {
    match event {
        RepositoryWatcherEvent::HeadChanged => &[
            CacheType::RepositoryInfo,
            CacheType::GitLog,
            CacheType::GitAheadBehind,
        ],
        RepositoryWatcherEvent::IndexChanged => &[CacheType::GitStatus],
        RepositoryWatcherEvent::ConfigChanged => &[
            CacheType::Branches,
            CacheType::RepositoryInfo,
            CacheType::GitLog,
        ],
        RepositoryWatcherEvent::RepositoryChanged => &[CacheType::GitStatus],
        RepositoryWatcherEvent::RepositoryCommitted => &[CacheType::GitLog, CacheType::GitStatus],
        RepositoryWatcherEvent::LocalBranchesChanged => &[
            CacheType::Branches,
            CacheType::GitLog,
            CacheType::GitAheadBehind,
        ],
        RepositoryWatcherEvent::RemoteBranchesChanged => {
            &[CacheType::Branches, CacheType::GitAheadBehind]
        }
    }
}

/// Current branch from HEAD and the remote it talks to.
///
/// A branch without a config section is synthesized unconfigured. The remote
/// is the branch's tracking remote, else one named `origin`, else the first
/// configured remote, else none. A detached HEAD has no branch but still
/// resolves a remote.
pub fn get_current_branch_and_remote(
    head: &HeadState,
    config: &GitConfig,
) -> (Option<ConfigBranch>, Option<ConfigRemote>) {
    let branch = head
        .branch_name()
        .map(|name| config.branch(name).unwrap_or_else(|| ConfigBranch::unconfigured(name)));

    let tracked = branch.as_ref().and_then(|b| b.remote.as_deref());
    let remote = tracked
        .and_then(|name| config.remote(name))
        .or_else(|| config.remote("origin"))
        .or_else(|| config.remotes.first())
        .cloned();

    (branch, remote)
}

pub fn read_repository_info(paths: &RepositoryPathConfiguration) -> Result<RepositoryInfo, TaskError> {
    let repo = refs::open(paths)?;
    let head = refs::read_head(&repo)?;
    let config = GitConfig::read(&repo)?;
    let (current_branch, current_remote) = get_current_branch_and_remote(&head, &config);
    Ok(RepositoryInfo {
        current_head: refs::resolve_head(&repo),
        head,
        current_branch,
        current_remote,
    })
}

fn read_branches_data(paths: &RepositoryPathConfiguration) -> Result<BranchesData, TaskError> {
    let repo = refs::open(paths)?;
    let config = GitConfig::read(&repo)?;
    Ok(refs::read_branches(&repo, config)?)
}

struct ManagerInner {
    paths: Arc<RepositoryPathConfiguration>,
    scheduler: TaskScheduler,
    client: Arc<dyn GitClient>,
    container: Arc<CacheContainer>,
    watcher: Arc<RepositoryWatcher>,
    busy: AtomicUsize,
    initialized: AtomicBool,
    file_log_path: Mutex<Option<String>>,
    /// Caches triggered again while their refresh was in flight.
    dirty_again: Mutex<BTreeSet<CacheType>>,
    events: broadcast::Sender<RepositoryManagerEvent>,
}

impl ManagerInner {
    fn emit(&self, event: RepositoryManagerEvent) {
        let _ = self.events.send(event);
    }

    fn enter_busy(&self) {
        if self.busy.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!(target: "gitkeeper.repository", "busy");
            self.emit(RepositoryManagerEvent::BusyChanged(true));
        }
    }

    fn leave_busy(&self) {
        let prev = self
            .busy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            tracing::debug!(target: "gitkeeper.repository", "idle");
            self.emit(RepositoryManagerEvent::BusyChanged(false));
        }
    }

    fn on_watcher_event(self: &Arc<Self>, event: RepositoryWatcherEvent) {
        tracing::debug!(target: "gitkeeper.repository", ?event, "watcher event");
        for cache_type in caches_invalidated_by(event) {
            self.update_cache(*cache_type);
        }
    }

    fn current_remote(&self) -> Option<ConfigRemote> {
        match read_repository_info(&self.paths) {
            Ok(info) => info.current_remote,
            Err(e) => {
                tracing::warn!(target: "gitkeeper.repository", error = %e, "failed to resolve current remote");
                None
            }
        }
    }

    fn update_cache(self: &Arc<Self>, cache_type: CacheType) -> Option<TaskHandle<()>> {
        if cache_type == CacheType::GitLocks && self.current_remote().is_none() {
            tracing::debug!(target: "gitkeeper.repository", "no current remote, locks not refreshed");
            return None;
        }
        if !self.container.invalidate_data(cache_type) {
            tracing::trace!(target: "gitkeeper.repository", cache = %cache_type, "refresh in flight, queued another");
            lock(&self.dirty_again).insert(cache_type);
            return None;
        }
        Some(self.start_refresh(cache_type))
    }

    fn validate_cache(self: &Arc<Self>, cache_type: CacheType) -> Option<TaskHandle<()>> {
        if cache_type == CacheType::GitLocks && self.current_remote().is_none() {
            return None;
        }
        if !self.container.validate_data(cache_type) {
            return None;
        }
        Some(self.start_refresh(cache_type))
    }

    fn start_refresh(self: &Arc<Self>, cache_type: CacheType) -> TaskHandle<()> {
        let inner = self.clone();
        self.refresh_task(cache_type)
            .finally(move |success, error| {
                // The data just stored may predate a trigger that arrived mid-refresh.
                let again = lock(&inner.dirty_again).remove(&cache_type);
                if success {
                    if again {
                        inner.update_cache(cache_type);
                    }
                    return;
                }
                inner.container.reset_invalidation(cache_type);
                match error {
                    Some(e) if e.is_canceled() => {
                        tracing::debug!(target: "gitkeeper.repository", cache = %cache_type, "refresh canceled");
                        return;
                    }
                    Some(e) => {
                        let error = TaskError::Invalidation {
                            cache_type,
                            message: e.to_string(),
                        };
                        tracing::warn!(target: "gitkeeper.repository", %error, "cache refresh failed");
                    }
                    None => {}
                }
                if again {
                    inner.update_cache(cache_type);
                }
            })
            .start(&self.scheduler)
    }

    fn store<T, F>(self: &Arc<Self>, task: Task<T>, publish: F) -> Task<()>
    where
        T: Send + 'static,
        F: FnOnce(&ManagerInner, T) + Send + 'static,
    {
        let inner = self.clone();
        let name = format!("store {}", task.name());
        task.then(name, TaskAffinity::None, move |_, data| async move {
            publish(&inner, data);
            Ok(())
        })
    }

    fn refresh_task(self: &Arc<Self>, cache_type: CacheType) -> Task<()> {
        match cache_type {
            CacheType::Branches => {
                let paths = self.paths.clone();
                let read = Task::from_fn("read branches", TaskAffinity::Concurrent, move |_| {
                    read_branches_data(&paths)
                });
                self.store(read, Self::publish_branches)
            }
            CacheType::RepositoryInfo => {
                let paths = self.paths.clone();
                let read = Task::from_fn("read repository info", TaskAffinity::Concurrent, move |_| {
                    read_repository_info(&paths)
                });
                self.store(read, Self::publish_repository_info)
            }
            CacheType::GitStatus => self.store(self.client.status(), Self::publish_status),
            CacheType::GitLog => self.store(self.client.log(None), Self::publish_log),
            CacheType::GitUser => self.store(self.client.user(), Self::publish_user),
            CacheType::GitFileLog => match lock(&self.file_log_path).clone() {
                Some(path) => self.store(self.client.file_log(&path), Self::publish_file_log),
                None => Task::failed(
                    "refresh git file log",
                    TaskError::faulted("no file selected for history"),
                ),
            },
            CacheType::GitLocks => match self.current_remote() {
                Some(remote) => self.store(self.client.list_locks(&remote.name), Self::publish_locks),
                None => Task::failed("refresh git locks", TaskError::faulted("no current remote")),
            },
            CacheType::GitAheadBehind => {
                let inner = self.clone();
                let read = Task::new("read ahead/behind", TaskAffinity::Concurrent, move |ctx| async move {
                    inner.ahead_behind(ctx).await
                });
                self.store(read, Self::publish_ahead_behind)
            }
        }
    }

    async fn ahead_behind(&self, ctx: TaskContext) -> Result<GitAheadBehindStatus, TaskError> {
        let info = read_repository_info(&self.paths)?;
        let tracking = info
            .current_branch
            .as_ref()
            .and_then(|b| Some((b.name.clone(), b.tracking_ref()?)));
        let Some((local, upstream)) = tracking else {
            return Ok(GitAheadBehindStatus::default());
        };
        self.client
            .ahead_behind(&local, &upstream)
            .start_linked(ctx.scheduler(), ctx.token())
            .wait()
            .await
            .into_value()
    }

    fn publish_branches(&self, data: BranchesData) {
        let (local, remote) = (data.local.clone(), data.remote.clone());
        self.container.update_branches(data);
        self.emit(RepositoryManagerEvent::LocalBranchesUpdated(local));
        self.emit(RepositoryManagerEvent::RemoteBranchesUpdated(remote));
    }

    fn publish_repository_info(&self, info: RepositoryInfo) {
        let event = RepositoryManagerEvent::CurrentBranchUpdated {
            branch: info.current_branch.clone(),
            remote: info.current_remote.clone(),
        };
        self.container.update_repository_info(info);
        self.emit(event);
    }

    fn publish_status(&self, data: GitStatus) {
        self.container.update_git_status(data.clone());
        self.emit(RepositoryManagerEvent::GitStatusUpdated(data));
    }

    fn publish_log(&self, data: Vec<GitLogEntry>) {
        self.container.update_git_log(data.clone());
        self.emit(RepositoryManagerEvent::GitLogUpdated(data));
    }

    fn publish_file_log(&self, data: GitFileLog) {
        self.container.update_git_file_log(data.clone());
        self.emit(RepositoryManagerEvent::GitFileLogUpdated(data));
    }

    fn publish_locks(&self, data: Vec<GitLock>) {
        self.container.update_git_locks(data.clone());
        self.emit(RepositoryManagerEvent::GitLocksUpdated(data));
    }

    fn publish_user(&self, data: GitUser) {
        self.container.update_git_user(data.clone());
        self.emit(RepositoryManagerEvent::GitUserUpdated(data));
    }

    fn publish_ahead_behind(&self, data: GitAheadBehindStatus) {
        self.container.update_git_ahead_behind(data);
        self.emit(RepositoryManagerEvent::GitAheadBehindUpdated(data));
    }
}

/// Decides what git state needs refreshing and why, and runs every mutating
/// operation through one busy/watcher wrapper.
#[derive(Clone)]
pub struct RepositoryManager {
    inner: Arc<ManagerInner>,
}

impl RepositoryManager {
    pub fn new(
        paths: RepositoryPathConfiguration,
        scheduler: TaskScheduler,
        client: Arc<dyn GitClient>,
        cfg: &AppConfig,
    ) -> Self {
        let paths = Arc::new(paths);
        let watcher = Arc::new(RepositoryWatcher::new(paths.clone(), cfg.watcher.clone()));
        let (events, _) = broadcast::channel(cfg.cache.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                paths,
                scheduler,
                client,
                container: Arc::new(CacheContainer::new(&cfg.cache)),
                watcher,
                busy: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
                file_log_path: Mutex::new(None),
                dirty_again: Mutex::new(BTreeSet::new()),
                events,
            }),
        }
    }

    pub fn paths(&self) -> &RepositoryPathConfiguration {
        &self.inner.paths
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    pub fn container(&self) -> &Arc<CacheContainer> {
        &self.inner.container
    }

    pub fn watcher(&self) -> &Arc<RepositoryWatcher> {
        &self.inner.watcher
    }

    pub fn client(&self) -> &Arc<dyn GitClient> {
        &self.inner.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryManagerEvent> {
        self.inner.events.subscribe()
    }

    /// True while any exclusive operation chain is running.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire) > 0
    }

    /// Set up the watcher, route its events to cache refreshes and refresh
    /// every cache once. Returns the refreshes started.
    pub fn initialize(&self) -> Result<Vec<TaskHandle<()>>, WatcherError> {
        self.inner.watcher.initialize()?;
        if !self.inner.initialized.swap(true, Ordering::AcqRel) {
            let weak = Arc::downgrade(&self.inner);
            self.inner.watcher.add_observer(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_watcher_event(event);
                }
            });
        }
        tracing::info!(
            target: "gitkeeper.repository",
            repository = %self.inner.paths.repository_path.display(),
            "repository manager initialized"
        );
        Ok(self.refresh_all())
    }

    pub fn refresh_all(&self) -> Vec<TaskHandle<()>> {
        CacheType::ALL
            .into_iter()
            .filter(|t| *t != CacheType::GitFileLog)
            .filter_map(|t| self.update_cache(t))
            .collect()
    }

    /// Start translating filesystem changes and pump them in the background.
    pub fn start(&self) -> Result<(), WatcherError> {
        self.inner.watcher.start()?;
        self.inner.watcher.spawn_pump(self.inner.scheduler.handle());
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.watcher.stop();
    }

    /// Refresh `cache_type` unless a refresh is already in flight. A failed
    /// refresh resets the invalidation so a later trigger retries.
    pub fn update_cache(&self, cache_type: CacheType) -> Option<TaskHandle<()>> {
        self.inner.update_cache(cache_type)
    }

    /// Refresh `cache_type` only when it is past its staleness threshold.
    pub fn validate_cache(&self, cache_type: CacheType) -> Option<TaskHandle<()>> {
        self.inner.validate_cache(cache_type)
    }

    /// Select the file whose history the GitFileLog cache holds and load it.
    pub fn load_file_log(&self, path: impl Into<String>) -> Option<TaskHandle<()>> {
        *lock(&self.inner.file_log_path) = Some(path.into());
        self.update_cache(CacheType::GitFileLog)
    }

    pub fn current_branch_and_remote(
        &self,
    ) -> Result<(Option<ConfigBranch>, Option<ConfigRemote>), TaskError> {
        let info = read_repository_info(&self.inner.paths)?;
        Ok((info.current_branch, info.current_remote))
    }

    pub fn save_caches(&self, store: &dyn SettingsStore) -> Result<(), SettingsError> {
        self.inner
            .container
            .save(store, &repository_key(&self.inner.paths.repository_path))
    }

    pub fn load_caches(&self, store: &dyn SettingsStore) -> Result<Vec<CacheUpdateEvent>, SettingsError> {
        self.inner
            .container
            .load(store, &repository_key(&self.inner.paths.repository_path))
    }

    /// Wrap a mutating operation once: exclusive chains hold Busy, and
    /// operations that write the work tree or git dir pause the watcher.
    /// Both are restored when the chain terminates, whatever the outcome.
    fn hook_up<T: Send + 'static>(&self, task: Task<T>, filesystem_changes_expected: bool) -> Task<T> {
        let exclusive = task.is_exclusive();
        if !exclusive && !filesystem_changes_expected {
            return task;
        }
        let start = self.inner.clone();
        let end = self.inner.clone();
        task.on_start(move || {
            if exclusive {
                start.enter_busy();
            }
            if filesystem_changes_expected {
                start.watcher.pause();
            }
        })
        .finally(move |_, _| {
            if filesystem_changes_expected {
                end.watcher.resume();
            }
            if exclusive {
                end.leave_busy();
            }
        })
    }

    fn resolve_remote(&self, remote: Option<&str>) -> Result<String, TaskError> {
        if let Some(remote) = remote {
            return Ok(remote.to_string());
        }
        let (_, current) = self.current_branch_and_remote()?;
        current
            .map(|r| r.name)
            .ok_or_else(|| TaskError::faulted("no remote configured"))
    }

    fn resolve_remote_and_branch(
        &self,
        remote: Option<&str>,
        branch: Option<&str>,
    ) -> Result<(String, String), TaskError> {
        let (current_branch, current_remote) = self.current_branch_and_remote()?;
        let remote = remote
            .map(str::to_string)
            .or_else(|| current_remote.map(|r| r.name))
            .ok_or_else(|| TaskError::faulted("no remote configured"))?;
        let branch = branch
            .map(str::to_string)
            .or_else(|| current_branch.map(|b| b.name))
            .ok_or_else(|| TaskError::faulted("HEAD is not on a branch"))?;
        Ok((remote, branch))
    }

    pub fn commit_all_files(&self, message: &str, body: Option<&str>) -> Task<String> {
        let task = self
            .inner
            .client
            .add_all()
            .then_task(self.inner.client.commit(message, body));
        self.hook_up(task, true)
    }

    pub fn commit_files(&self, files: &[String], message: &str, body: Option<&str>) -> Task<String> {
        let task = self
            .inner
            .client
            .add(files)
            .then_task(self.inner.client.commit(message, body));
        self.hook_up(task, true)
    }

    /// Push `branch` (default: current) to `remote` (default: current remote).
    pub fn push(&self, remote: Option<&str>, branch: Option<&str>) -> Task<String> {
        let task = match self.resolve_remote_and_branch(remote, branch) {
            Ok((remote, branch)) => self.inner.client.push(&remote, &branch),
            Err(e) => Task::failed("push", e),
        };
        self.hook_up(task, false)
    }

    pub fn pull(&self, remote: Option<&str>, branch: Option<&str>) -> Task<String> {
        let task = match self.resolve_remote_and_branch(remote, branch) {
            Ok((remote, branch)) => self.inner.client.pull(&remote, &branch),
            Err(e) => Task::failed("pull", e),
        };
        self.hook_up(task, true)
    }

    pub fn fetch(&self, remote: Option<&str>) -> Task<String> {
        let task = match self.resolve_remote(remote) {
            Ok(remote) => self.inner.client.fetch(&remote),
            Err(e) => Task::failed("fetch", e),
        };
        self.hook_up(task, false)
    }

    pub fn revert(&self, commit_id: &str) -> Task<String> {
        self.hook_up(self.inner.client.revert(commit_id), true)
    }

    pub fn create_branch(&self, branch: &str, base: &str) -> Task<String> {
        self.hook_up(self.inner.client.create_branch(branch, base), false)
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Task<String> {
        self.hook_up(self.inner.client.delete_branch(branch, force), false)
    }

    pub fn switch_branch(&self, branch: &str) -> Task<String> {
        self.hook_up(self.inner.client.switch_branch(branch), true)
    }

    pub fn lock_file(&self, file: &str) -> Task<String> {
        let task = self.hook_up(self.inner.client.lock(file), false);
        self.refresh_locks_after(task)
    }

    pub fn unlock_file(&self, file: &str, force: bool) -> Task<String> {
        let task = self.hook_up(self.inner.client.unlock(file, force), false);
        self.refresh_locks_after(task)
    }

    fn refresh_locks_after(&self, task: Task<String>) -> Task<String> {
        let inner = self.inner.clone();
        task.finally(move |success, _| {
            if success {
                inner.update_cache(CacheType::GitLocks);
            }
        })
    }

    /// Throw away local changes to `entries`.
    ///
    /// Entries with no committed version (added or untracked) are deleted
    /// from disk; everything else is restored through the git client. Both
    /// happen in one exclusive chain.
    pub fn discard_changes(&self, entries: &[GitStatusEntry]) -> Task<String> {
        let (to_delete, to_restore): (Vec<&GitStatusEntry>, Vec<&GitStatusEntry>) =
            entries.iter().partition(|e| e.has_no_committed_version());
        let to_delete: Vec<PathBuf> = to_delete.into_iter().map(|e| e.full_path.clone()).collect();
        let to_restore: Vec<String> = to_restore.into_iter().map(|e| e.path.clone()).collect();

        let deleted = to_delete.len();
        let delete = Task::from_fn("delete uncommitted files", TaskAffinity::Exclusive, move |ctx| {
            for path in &to_delete {
                ctx.check_cancelled()?;
                remove_path(path)?;
                tracing::debug!(target: "gitkeeper.repository", path = %path.display(), "deleted");
            }
            Ok(format!("deleted {deleted} file(s)"))
        });

        let task = if to_restore.is_empty() {
            delete
        } else {
            delete.then_task(self.inner.client.discard(&to_restore))
        };
        self.hook_up(task, true)
    }

    pub fn discard_all_changes(&self) -> Task<String> {
        self.hook_up(self.inner.client.discard_all(), true)
    }

    pub fn checkout_files(&self, commit_id: &str, files: &[String]) -> Task<String> {
        self.hook_up(self.inner.client.checkout_version(commit_id, files), true)
    }

    pub fn remote_add(&self, name: &str, url: &str) -> Task<String> {
        self.hook_up(self.inner.client.remote_add(name, url), false)
    }

    pub fn remote_remove(&self, name: &str) -> Task<String> {
        self.hook_up(self.inner.client.remote_remove(name), false)
    }
}

fn remove_path(path: &std::path::Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
