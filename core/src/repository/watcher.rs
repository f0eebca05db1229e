//! Translates filesystem notifications on repository artifacts into named
//! change events.
//!
//! Raw paths arrive on a [`ChangeFeed`] (from `notify`, or from a host that
//! watches files itself) and are classified in batches by
//! [`RepositoryWatcher::check_and_process_events`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::paths::RepositoryPathConfiguration;
use super::refs;
use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::util::{lock, read, write};

/// Named repository change. Variant order is the order events of one batch
/// are raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RepositoryWatcherEvent {
    ConfigChanged,
    HeadChanged,
    IndexChanged,
    RepositoryCommitted,
    LocalBranchesChanged,
    RemoteBranchesChanged,
    RepositoryChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatcherState {
    Stopped,
    Started,
    Paused,
}

/// Cloneable intake of changed paths.
#[derive(Debug, Clone, Default)]
pub struct ChangeFeed {
    pending: Arc<Mutex<Vec<PathBuf>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: impl Into<PathBuf>) {
        lock(&self.pending).push(path.into());
    }

    pub fn push_all<I: IntoIterator<Item = PathBuf>>(&self, paths: I) {
        lock(&self.pending).extend(paths);
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    fn drain(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *lock(&self.pending))
    }

    fn clear(&self) {
        lock(&self.pending).clear();
    }
}

type Observer = Arc<dyn Fn(RepositoryWatcherEvent) + Send + Sync>;

struct Lifecycle {
    state: WatcherState,
    pause_count: usize,
    initialized: bool,
}

pub struct RepositoryWatcher {
    paths: Arc<RepositoryPathConfiguration>,
    cfg: WatcherConfig,
    feed: ChangeFeed,
    lifecycle: Mutex<Lifecycle>,
    processing: AtomicBool,
    observers: RwLock<Vec<Observer>>,
    notify: Mutex<Option<RecommendedWatcher>>,
    pump: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Clears the processing flag however the drain exits.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, WatcherError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| WatcherError::Reentrant)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RepositoryWatcher {
    pub fn new(paths: Arc<RepositoryPathConfiguration>, cfg: WatcherConfig) -> Self {
        Self {
            paths,
            cfg,
            feed: ChangeFeed::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: WatcherState::Stopped,
                pause_count: 0,
                initialized: false,
            }),
            processing: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
            notify: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn paths(&self) -> &RepositoryPathConfiguration {
        &self.paths
    }

    pub fn state(&self) -> WatcherState {
        lock(&self.lifecycle).state
    }

    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(RepositoryWatcherEvent) + Send + Sync + 'static,
    {
        write(&self.observers).push(Arc::new(observer));
    }

    /// One-time setup of OS notifications on the working tree, the git dir
    /// and, for worktrees, the common dir. A no-op when notifications are
    /// disabled in config.
    pub fn initialize(&self) -> Result<(), WatcherError> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.initialized {
            return Ok(());
        }
        if self.cfg.enabled {
            let watcher = self.install_notify()?;
            *lock(&self.notify) = Some(watcher);
        }
        lifecycle.initialized = true;
        tracing::debug!(
            target: "gitkeeper.watcher",
            repository = %self.paths.repository_path.display(),
            notify = self.cfg.enabled,
            worktree = self.paths.is_worktree,
            "watcher initialized"
        );
        Ok(())
    }

    fn install_notify(&self) -> Result<RecommendedWatcher, WatcherError> {
        let feed = self.feed.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_content_change_event(&event) {
                    feed.push_all(event.paths);
                }
            }
            Err(err) => {
                tracing::warn!(target: "gitkeeper.watcher", error = %err, "watch error");
            }
        })
        .map_err(|e| WatcherError::Notify {
            path: self.paths.repository_path.clone(),
            message: e.to_string(),
        })?;

        let mut roots = vec![self.paths.repository_path.clone()];
        for extra in [&self.paths.git_dir, &self.paths.common_dir] {
            if !roots.iter().any(|r| extra.starts_with(r)) {
                roots.push(extra.clone());
            }
        }
        for root in roots {
            watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|e| WatcherError::Notify {
                    path: root.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(watcher)
    }

    /// Begin translating notifications. Anything recorded while stopped is
    /// discarded.
    pub fn start(&self) -> Result<(), WatcherError> {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.initialized {
            return Err(WatcherError::NotInitialized);
        }
        if lifecycle.state == WatcherState::Stopped {
            self.feed.clear();
            lifecycle.state = if lifecycle.pause_count > 0 {
                WatcherState::Paused
            } else {
                WatcherState::Started
            };
            tracing::debug!(target: "gitkeeper.watcher", state = ?lifecycle.state, "watcher started");
        }
        Ok(())
    }

    pub fn stop(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.state = WatcherState::Stopped;
        drop(lifecycle);
        self.feed.clear();
        self.stop_pump();
        tracing::debug!(target: "gitkeeper.watcher", "watcher stopped");
    }

    /// Suspend event translation around a mutating operation. Pauses nest;
    /// notifications keep being recorded and are processed after the last
    /// [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.pause_count += 1;
        if lifecycle.state == WatcherState::Started {
            lifecycle.state = WatcherState::Paused;
        }
        tracing::trace!(target: "gitkeeper.watcher", pauses = lifecycle.pause_count, "watcher paused");
    }

    pub fn resume(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.pause_count = lifecycle.pause_count.saturating_sub(1);
        if lifecycle.pause_count == 0 && lifecycle.state == WatcherState::Paused {
            lifecycle.state = WatcherState::Started;
        }
        tracing::trace!(target: "gitkeeper.watcher", pauses = lifecycle.pause_count, "watcher resumed");
    }

    pub fn pause_count(&self) -> usize {
        lock(&self.lifecycle).pause_count
    }

    /// Drain pending notifications and raise the resulting events to every
    /// observer, synchronously and in order.
    ///
    /// Calling this from inside an observer returns
    /// [`WatcherError::Reentrant`]. Returns the number of events raised.
    pub fn check_and_process_events(&self) -> Result<usize, WatcherError> {
        let _guard = ProcessingGuard::acquire(&self.processing)?;

        match self.state() {
            WatcherState::Stopped => {
                self.feed.clear();
                return Ok(0);
            }
            WatcherState::Paused => return Ok(0),
            WatcherState::Started => {}
        }

        let changed = self.feed.drain();
        if changed.is_empty() {
            return Ok(0);
        }

        let events = self.classify(&changed);
        tracing::debug!(target: "gitkeeper.watcher", paths = changed.len(), ?events, "processing change batch");

        let observers: Vec<Observer> = read(&self.observers).clone();
        for event in &events {
            for observer in &observers {
                observer(*event);
            }
        }
        Ok(events.len())
    }

    /// Map a batch of changed paths to the set of events it implies.
    pub fn classify(&self, changed: &[PathBuf]) -> Vec<RepositoryWatcherEvent> {
        let current_branch = match refs::open(&self.paths).and_then(|repo| refs::read_head(&repo)) {
            Ok(head) => head.branch_name().map(str::to_string),
            Err(e) => {
                tracing::warn!(target: "gitkeeper.watcher", error = %e, "failed to read HEAD");
                None
            }
        };

        let mut events = BTreeSet::new();
        for path in changed {
            self.classify_path(path, current_branch.as_deref(), &mut events);
        }
        events.into_iter().collect()
    }

    fn classify_path(
        &self,
        path: &Path,
        current_branch: Option<&str>,
        events: &mut BTreeSet<RepositoryWatcherEvent>,
    ) {
        use RepositoryWatcherEvent::*;

        let (rel, per_worktree) = if let Ok(rel) = path.strip_prefix(&self.paths.git_dir) {
            (rel, true)
        } else if let Ok(rel) = path.strip_prefix(&self.paths.common_dir) {
            (rel, false)
        } else {
            if path != self.paths.dot_git_path && path.starts_with(&self.paths.repository_path) {
                events.insert(RepositoryChanged);
            }
            return;
        };

        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel.ends_with(".lock") {
            return;
        }

        match rel.as_str() {
            "config" => {
                events.insert(ConfigChanged);
            }
            "HEAD" if per_worktree => {
                events.insert(HeadChanged);
            }
            "index" if per_worktree => {
                events.insert(IndexChanged);
            }
            "packed-refs" => {
                events.insert(LocalBranchesChanged);
                events.insert(RemoteBranchesChanged);
            }
            "refs/heads" => {
                events.insert(LocalBranchesChanged);
            }
            "refs/remotes" => {
                events.insert(RemoteBranchesChanged);
            }
            other => {
                if let Some(branch) = other.strip_prefix("refs/heads/") {
                    if Some(branch) == current_branch {
                        events.insert(RepositoryCommitted);
                    } else {
                        events.insert(LocalBranchesChanged);
                    }
                } else if other.starts_with("refs/remotes/") {
                    events.insert(RemoteBranchesChanged);
                }
            }
        }
    }

    /// Drain the feed every `poll_interval` on `handle` until stopped.
    pub fn spawn_pump(self: &Arc<Self>, handle: &tokio::runtime::Handle) {
        let mut pump = lock(&self.pump);
        if pump.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let watcher = Arc::downgrade(self);
        let interval = self.cfg.poll_interval();
        let stop = token.clone();
        let join = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(watcher) = watcher.upgrade() else {
                    break;
                };
                match watcher.check_and_process_events() {
                    Ok(_) | Err(WatcherError::Reentrant) => {}
                    Err(e) => tracing::warn!(target: "gitkeeper.watcher", error = %e, "event pump failed"),
                }
            }
            tracing::debug!(target: "gitkeeper.watcher", "event pump stopped");
        });
        *pump = Some((token, join));
    }

    fn stop_pump(&self) {
        if let Some((token, _join)) = lock(&self.pump).take() {
            token.cancel();
        }
    }
}

impl Drop for RepositoryWatcher {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

fn is_content_change_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any
    )
}
