use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{CacheEntry, CacheEvent, CacheType, CacheUpdateEvent};
use crate::config::CacheConfig;
use crate::error::SettingsError;
use crate::git::{
    BranchesData, GitAheadBehindStatus, GitFileLog, GitLock, GitLogEntry, GitStatus, GitUser,
    RepositoryInfo,
};
use crate::settings::SettingsStore;
use crate::util::{read, write};

fn snapshot_key(scope: &str) -> String {
    format!("cache.{scope}")
}

#[derive(Debug, Clone, Copy, Default)]
struct Meta {
    last_updated: Option<DateTime<Utc>>,
    needs_validation: bool,
    timeout: Option<std::time::Duration>,
}

#[derive(Default)]
struct Slots {
    meta: [Meta; 8],
    last_stamp: Option<DateTime<Utc>>,
    branches: BranchesData,
    git_status: GitStatus,
    git_log: Vec<GitLogEntry>,
    git_file_log: GitFileLog,
    git_locks: Vec<GitLock>,
    git_user: GitUser,
    git_ahead_behind: GitAheadBehindStatus,
    repository_info: RepositoryInfo,
}

impl Slots {
    /// Timestamps are issued strictly increasing, even when the wall clock
    /// stalls or steps backwards.
    fn next_stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_stamp {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn entry<T: Clone>(&self, cache_type: CacheType, data: &T) -> CacheEntry<T> {
        let meta = self.meta[cache_type.index()];
        CacheEntry {
            data: data.clone(),
            last_updated: meta.last_updated,
            needs_validation: meta.needs_validation,
            timeout: meta.timeout,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    branches: Option<CacheEntry<BranchesData>>,
    git_status: Option<CacheEntry<GitStatus>>,
    git_log: Option<CacheEntry<Vec<GitLogEntry>>>,
    git_file_log: Option<CacheEntry<GitFileLog>>,
    git_locks: Option<CacheEntry<Vec<GitLock>>>,
    git_user: Option<CacheEntry<GitUser>>,
    git_ahead_behind: Option<CacheEntry<GitAheadBehindStatus>>,
    repository_info: Option<CacheEntry<RepositoryInfo>>,
}

/// Every cached payload of one repository session, stamped and observable.
///
/// Constructed once per repository and shared by reference; there is no
/// process-wide instance.
pub struct CacheContainer {
    slots: RwLock<Slots>,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl CacheContainer {
    pub fn new(cfg: &CacheConfig) -> Self {
        let mut slots = Slots::default();
        for cache_type in CacheType::ALL {
            slots.meta[cache_type.index()].timeout = cfg.timeout_for(cache_type);
        }
        let (event_tx, _) = broadcast::channel(cfg.event_channel_capacity.max(1));
        Self {
            slots: RwLock::new(slots),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        tracing::trace!(target: "gitkeeper.cache", ?event, "cache event");
        let _ = self.event_tx.send(event);
    }

    /// Mark `cache_type` stale.
    ///
    /// Returns `true` when this call started the invalidation, i.e. the
    /// caller owns the refresh; `false` while one is already in flight.
    pub fn invalidate_data(&self, cache_type: CacheType) -> bool {
        let started = {
            let mut slots = write(&self.slots);
            let meta = &mut slots.meta[cache_type.index()];
            if meta.needs_validation {
                false
            } else {
                meta.needs_validation = true;
                true
            }
        };
        if started {
            tracing::debug!(target: "gitkeeper.cache", cache = %cache_type, "cache invalidated");
            self.emit(CacheEvent::Invalidated(cache_type));
        }
        started
    }

    /// Invalidate `cache_type` only if it is past its staleness threshold.
    /// Same return contract as [`invalidate_data`](Self::invalidate_data).
    pub fn validate_data(&self, cache_type: CacheType) -> bool {
        if self.is_stale(cache_type) {
            self.invalidate_data(cache_type)
        } else {
            false
        }
    }

    /// Roll back an invalidation whose refresh failed, so a later trigger
    /// can try again.
    pub fn reset_invalidation(&self, cache_type: CacheType) {
        write(&self.slots).meta[cache_type.index()].needs_validation = false;
        tracing::debug!(target: "gitkeeper.cache", cache = %cache_type, "invalidation reset");
    }

    pub fn needs_validation(&self, cache_type: CacheType) -> bool {
        read(&self.slots).meta[cache_type.index()].needs_validation
    }

    pub fn is_stale(&self, cache_type: CacheType) -> bool {
        let meta = read(&self.slots).meta[cache_type.index()];
        CacheEntry {
            data: (),
            last_updated: meta.last_updated,
            needs_validation: meta.needs_validation,
            timeout: meta.timeout,
        }
        .is_stale(Utc::now())
    }

    pub fn last_updated(&self, cache_type: CacheType) -> Option<DateTime<Utc>> {
        read(&self.slots).meta[cache_type.index()].last_updated
    }

    pub fn current_event(&self, cache_type: CacheType) -> Option<CacheUpdateEvent> {
        self.last_updated(cache_type)
            .map(|timestamp| CacheUpdateEvent { cache_type, timestamp })
    }

    /// The cache's current update event, but only when strictly newer than
    /// what the observer last saw.
    pub fn check_and_raise_events_if_cache_newer(
        &self,
        cache_type: CacheType,
        last_seen: Option<&CacheUpdateEvent>,
    ) -> Option<CacheUpdateEvent> {
        let current = self.current_event(cache_type)?;
        match last_seen {
            Some(seen) if seen.timestamp >= current.timestamp => None,
            _ => Some(current),
        }
    }

    fn store(&self, cache_type: CacheType, apply: impl FnOnce(&mut Slots)) -> CacheUpdateEvent {
        let event = {
            let mut slots = write(&self.slots);
            apply(&mut slots);
            let timestamp = slots.next_stamp(Utc::now());
            let meta = &mut slots.meta[cache_type.index()];
            meta.last_updated = Some(timestamp);
            meta.needs_validation = false;
            CacheUpdateEvent {
                cache_type,
                timestamp,
            }
        };
        tracing::debug!(target: "gitkeeper.cache", cache = %cache_type, timestamp = %event.timestamp, "cache updated");
        self.emit(CacheEvent::Updated(event));
        event
    }

    pub fn update_branches(&self, data: BranchesData) -> CacheUpdateEvent {
        self.store(CacheType::Branches, |s| s.branches = data)
    }

    pub fn update_git_status(&self, data: GitStatus) -> CacheUpdateEvent {
        self.store(CacheType::GitStatus, |s| s.git_status = data)
    }

    pub fn update_git_log(&self, data: Vec<GitLogEntry>) -> CacheUpdateEvent {
        self.store(CacheType::GitLog, |s| s.git_log = data)
    }

    pub fn update_git_file_log(&self, data: GitFileLog) -> CacheUpdateEvent {
        self.store(CacheType::GitFileLog, |s| s.git_file_log = data)
    }

    pub fn update_git_locks(&self, data: Vec<GitLock>) -> CacheUpdateEvent {
        self.store(CacheType::GitLocks, |s| s.git_locks = data)
    }

    pub fn update_git_user(&self, data: GitUser) -> CacheUpdateEvent {
        self.store(CacheType::GitUser, |s| s.git_user = data)
    }

    pub fn update_git_ahead_behind(&self, data: GitAheadBehindStatus) -> CacheUpdateEvent {
        self.store(CacheType::GitAheadBehind, |s| s.git_ahead_behind = data)
    }

    pub fn update_repository_info(&self, data: RepositoryInfo) -> CacheUpdateEvent {
        self.store(CacheType::RepositoryInfo, |s| s.repository_info = data)
    }

    pub fn branches(&self) -> CacheEntry<BranchesData> {
        let s = read(&self.slots);
        s.entry(CacheType::Branches, &s.branches)
    }

    pub fn git_status(&self) -> CacheEntry<GitStatus> {
        let s = read(&self.slots);
        s.entry(CacheType::GitStatus, &s.git_status)
    }

    pub fn git_log(&self) -> CacheEntry<Vec<GitLogEntry>> {
        let s = read(&self.slots);
        s.entry(CacheType::GitLog, &s.git_log)
    }

    pub fn git_file_log(&self) -> CacheEntry<GitFileLog> {
        let s = read(&self.slots);
        s.entry(CacheType::GitFileLog, &s.git_file_log)
    }

    pub fn git_locks(&self) -> CacheEntry<Vec<GitLock>> {
        let s = read(&self.slots);
        s.entry(CacheType::GitLocks, &s.git_locks)
    }

    pub fn git_user(&self) -> CacheEntry<GitUser> {
        let s = read(&self.slots);
        s.entry(CacheType::GitUser, &s.git_user)
    }

    pub fn git_ahead_behind(&self) -> CacheEntry<GitAheadBehindStatus> {
        let s = read(&self.slots);
        s.entry(CacheType::GitAheadBehind, &s.git_ahead_behind)
    }

    pub fn repository_info(&self) -> CacheEntry<RepositoryInfo> {
        let s = read(&self.slots);
        s.entry(CacheType::RepositoryInfo, &s.repository_info)
    }

    /// Persist every populated cache with its timestamp under `scope`
    /// (typically the repository key).
    pub fn save(&self, store: &dyn SettingsStore, scope: &str) -> Result<(), SettingsError> {
        let snapshot = {
            let s = read(&self.slots);
            let populated = |t: CacheType| s.meta[t.index()].last_updated.is_some();
            Snapshot {
                branches: populated(CacheType::Branches)
                    .then(|| s.entry(CacheType::Branches, &s.branches)),
                git_status: populated(CacheType::GitStatus)
                    .then(|| s.entry(CacheType::GitStatus, &s.git_status)),
                git_log: populated(CacheType::GitLog).then(|| s.entry(CacheType::GitLog, &s.git_log)),
                git_file_log: populated(CacheType::GitFileLog)
                    .then(|| s.entry(CacheType::GitFileLog, &s.git_file_log)),
                git_locks: populated(CacheType::GitLocks)
                    .then(|| s.entry(CacheType::GitLocks, &s.git_locks)),
                git_user: populated(CacheType::GitUser)
                    .then(|| s.entry(CacheType::GitUser, &s.git_user)),
                git_ahead_behind: populated(CacheType::GitAheadBehind)
                    .then(|| s.entry(CacheType::GitAheadBehind, &s.git_ahead_behind)),
                repository_info: populated(CacheType::RepositoryInfo)
                    .then(|| s.entry(CacheType::RepositoryInfo, &s.repository_info)),
            }
        };
        store.set(&snapshot_key(scope), &snapshot)
    }

    /// Restore caches saved by [`save`](Self::save). An entry only replaces
    /// the live one when its timestamp is newer, so observers never see time
    /// move backwards. Returns the events raised for restored entries.
    pub fn load(
        &self,
        store: &dyn SettingsStore,
        scope: &str,
    ) -> Result<Vec<CacheUpdateEvent>, SettingsError> {
        let Some(snapshot) = store.get::<Snapshot>(&snapshot_key(scope))? else {
            return Ok(Vec::new());
        };

        let mut restored = Vec::new();
        {
            let mut s = write(&self.slots);
            restore(&mut s, CacheType::Branches, snapshot.branches, |s| &mut s.branches, &mut restored);
            restore(&mut s, CacheType::GitStatus, snapshot.git_status, |s| &mut s.git_status, &mut restored);
            restore(&mut s, CacheType::GitLog, snapshot.git_log, |s| &mut s.git_log, &mut restored);
            restore(&mut s, CacheType::GitFileLog, snapshot.git_file_log, |s| &mut s.git_file_log, &mut restored);
            restore(&mut s, CacheType::GitLocks, snapshot.git_locks, |s| &mut s.git_locks, &mut restored);
            restore(&mut s, CacheType::GitUser, snapshot.git_user, |s| &mut s.git_user, &mut restored);
            restore(
                &mut s,
                CacheType::GitAheadBehind,
                snapshot.git_ahead_behind,
                |s| &mut s.git_ahead_behind,
                &mut restored,
            );
            restore(
                &mut s,
                CacheType::RepositoryInfo,
                snapshot.repository_info,
                |s| &mut s.repository_info,
                &mut restored,
            );
        }

        tracing::debug!(target: "gitkeeper.cache", restored = restored.len(), "cache snapshot loaded");
        for event in &restored {
            self.emit(CacheEvent::Updated(*event));
        }
        Ok(restored)
    }
}

fn restore<T>(
    slots: &mut Slots,
    cache_type: CacheType,
    saved: Option<CacheEntry<T>>,
    slot: impl FnOnce(&mut Slots) -> &mut T,
    restored: &mut Vec<CacheUpdateEvent>,
) {
    let Some(CacheEntry {
        data,
        last_updated: Some(timestamp),
        ..
    }) = saved
    else {
        return;
    };
    let current = slots.meta[cache_type.index()].last_updated;
    if current.is_some_and(|c| c >= timestamp) {
        return;
    }

    *slot(slots) = data;
    slots.meta[cache_type.index()].last_updated = Some(timestamp);
    if slots.last_stamp.map_or(true, |last| last < timestamp) {
        slots.last_stamp = Some(timestamp);
    }
    restored.push(CacheUpdateEvent {
        cache_type,
        timestamp,
    });
}
