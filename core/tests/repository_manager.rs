mod common;

use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::Duration;

use common::{commit_on_head, initialized, manager, wait_until, FakeGitClient, TestRepo};
use futures::executor::block_on;
use gitkeeper_core::cache::{CacheEvent, CacheType};
use gitkeeper_core::git::{ConfigBranch, GitFileStatus, GitLock, GitStatus, GitStatusEntry};
use gitkeeper_core::repository::{Repository, RepositoryManagerEvent, WatcherState};
use gitkeeper_core::settings::{MemorySettingsStore, SettingsStore};
use gitkeeper_core::task::{Task, TaskAffinity};
use gitkeeper_core::TaskOutcome;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

fn drain_invalidations(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheType> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CacheEvent::Invalidated(t) = event {
            seen.push(t);
        }
    }
    seen
}

#[test]
fn busy_spans_the_exclusive_chain_on_every_outcome() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());
    initialized(&manager);

    let seen_busy = Arc::new(Mutex::new(Vec::new()));
    let observer = manager.clone();
    let sink = seen_busy.clone();
    client.on_mutation(move |op| sink.lock().unwrap().push((op.to_string(), observer.is_busy())));

    let outcome = block_on(manager.commit_all_files("first", None).start(manager.scheduler()).wait());
    assert!(outcome.is_success());
    assert!(!manager.is_busy());

    client.fail("commit");
    let outcome = block_on(manager.commit_all_files("second", None).start(manager.scheduler()).wait());
    assert!(matches!(outcome, TaskOutcome::Faulted(_)));
    assert!(!manager.is_busy(), "busy must clear after a failed chain");

    client.succeed("commit");
    let handle = manager.commit_all_files("third", None).start(manager.scheduler());
    handle.cancel();
    let _ = block_on(handle.wait());
    assert!(!manager.is_busy(), "busy must clear after a canceled chain");

    let seen = seen_busy.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|(_, busy)| *busy), "{seen:?}");
}

#[test]
fn busy_events_bracket_the_operation() {
    let repo = TestRepo::tracking_main();
    let manager = manager(&repo, FakeGitClient::new());
    initialized(&manager);
    let mut rx = manager.subscribe();

    block_on(manager.switch_branch("dev").start(manager.scheduler()).wait());

    let mut busy = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RepositoryManagerEvent::BusyChanged(b) = event {
            busy.push(b);
        }
    }
    assert_eq!(busy, vec![true, false]);
}

#[test]
fn watcher_is_paused_only_around_file_changing_operations() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());
    initialized(&manager);
    manager.watcher().start().unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let watcher = manager.watcher().clone();
    let sink = states.clone();
    client.on_mutation(move |op| sink.lock().unwrap().push((op.to_string(), watcher.state())));

    client.fail("pull");
    block_on(manager.pull(None, None).start(manager.scheduler()).wait());
    block_on(manager.create_branch("topic", "main").start(manager.scheduler()).wait());

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ("pull".to_string(), WatcherState::Paused),
            ("branch".to_string(), WatcherState::Started),
        ]
    );
    assert_eq!(manager.watcher().state(), WatcherState::Started);
    assert_eq!(manager.watcher().pause_count(), 0);
}

#[test]
fn failed_refresh_resets_invalidation() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    client.fail("status");
    let manager = manager(&repo, client.clone());

    let handle = manager.update_cache(CacheType::GitStatus).unwrap();
    assert!(!block_on(handle.wait()).is_success());
    assert!(!manager.container().needs_validation(CacheType::GitStatus));

    client.succeed("status");
    let retry = manager.update_cache(CacheType::GitStatus).expect("a later trigger retries");
    assert!(block_on(retry.wait()).is_success());
    assert!(manager.container().last_updated(CacheType::GitStatus).is_some());
}

#[test]
fn trigger_during_refresh_refreshes_again() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());

    // Hold both concurrent workers so the first refresh stays queued.
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let (started_tx, started_rx) = mpsc::channel();
    let holders: Vec<_> = (0..2)
        .map(|i| {
            let gate = gate.clone();
            let started = started_tx.clone();
            Task::from_fn(format!("hold worker {i}"), TaskAffinity::Concurrent, move |_| {
                started.send(()).unwrap();
                let (open, cv) = &*gate;
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cv.wait(open).unwrap();
                }
                Ok(())
            })
            .start(manager.scheduler())
        })
        .collect();
    for _ in 0..2 {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    let first = manager.update_cache(CacheType::GitStatus).expect("first trigger owns the refresh");
    client.set_status(GitStatus {
        entries: vec![GitStatusEntry::new(
            repo.path(),
            "Assets/old.txt",
            GitFileStatus::None,
            GitFileStatus::Modified,
        )],
        ..GitStatus::default()
    });
    assert!(manager.update_cache(CacheType::GitStatus).is_none());

    {
        let (open, cv) = &*gate;
        *open.lock().unwrap() = true;
        cv.notify_all();
    }
    for holder in holders {
        assert!(block_on(holder.wait()).is_success());
    }
    assert!(block_on(first.wait()).is_success());

    wait_until("status refreshed after the second trigger", || {
        manager.container().git_status().data.entries.len() == 1
    });
    assert_eq!(client.ops().iter().filter(|op| *op == "status").count(), 2);
}

#[test]
fn untracked_branch_without_origin_resolves_no_remote() {
    let repo = TestRepo::new("feature/x", &["upstream"]);
    let manager = manager(&repo, FakeGitClient::new());
    let (branch, remote) = manager.current_branch_and_remote().unwrap();
    assert_eq!(branch, Some(ConfigBranch::unconfigured("feature/x")));
    assert_eq!(remote.map(|r| r.name).as_deref(), Some("upstream"));

    let repo = TestRepo::new("feature/x", &[]);
    let manager = common::manager(&repo, FakeGitClient::new());
    let (branch, remote) = manager.current_branch_and_remote().unwrap();
    assert_eq!(branch, Some(ConfigBranch::unconfigured("feature/x")));
    assert_eq!(remote, None);
}

#[test]
fn working_tree_change_invalidates_status_only() {
    let repo = TestRepo::tracking_main();
    let manager = manager(&repo, FakeGitClient::new());
    initialized(&manager);
    manager.watcher().start().unwrap();

    let mut rx = manager.container().subscribe();
    let file = repo.write("Assets/scene.unity", "modified");
    manager.watcher().feed().push(file);
    assert_eq!(manager.watcher().check_and_process_events().unwrap(), 1);

    assert_eq!(drain_invalidations(&mut rx), vec![CacheType::GitStatus]);
}

#[test]
fn commit_refreshes_log_and_status_and_ends_idle() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());
    initialized(&manager);
    manager.watcher().start().unwrap();

    let feed = manager.watcher().feed().clone();
    let root = repo.path().to_path_buf();
    let branch_ref = repo.git_path("refs/heads/main");
    client.on_mutation(move |op| {
        if op == "commit" {
            let repo = git2::Repository::open(&root).unwrap();
            commit_on_head(&repo, "message");
            feed.push(branch_ref.clone());
        }
    });

    let log_before = manager.container().last_updated(CacheType::GitLog);
    let status_before = manager.container().last_updated(CacheType::GitStatus);
    let branches_before = manager.container().last_updated(CacheType::Branches);

    let outcome = block_on(manager.commit_all_files("message", None).start(manager.scheduler()).wait());
    assert_eq!(outcome, TaskOutcome::Success("commit done".to_string()));
    assert!(!manager.is_busy());
    let calls = client.calls();
    assert_eq!(
        calls[calls.len() - 2..].to_vec(),
        vec!["add --all".to_string(), "commit message".to_string()]
    );

    assert_eq!(manager.watcher().check_and_process_events().unwrap(), 1);
    wait_until("log and status refresh", || {
        manager.container().last_updated(CacheType::GitLog) > log_before
            && manager.container().last_updated(CacheType::GitStatus) > status_before
    });
    assert_eq!(manager.container().last_updated(CacheType::Branches), branches_before);
}

#[test]
fn discard_deletes_untracked_and_reverts_modified() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());

    let untracked = repo.write("Assets/new.txt", "scratch");
    let modified = repo.write("Assets/old.txt", "edited");
    let untracked_entry =
        GitStatusEntry::new(repo.path(), "Assets/new.txt", GitFileStatus::Untracked, GitFileStatus::Untracked);
    let modified_entry =
        GitStatusEntry::new(repo.path(), "Assets/old.txt", GitFileStatus::None, GitFileStatus::Modified);

    let outcome = block_on(
        manager
            .discard_changes(std::slice::from_ref(&untracked_entry))
            .start(manager.scheduler())
            .wait(),
    );
    assert!(outcome.is_success());
    assert!(!untracked.exists());
    assert!(client.calls().iter().all(|c| !c.starts_with("discard")));

    let outcome = block_on(
        manager
            .discard_changes(std::slice::from_ref(&modified_entry))
            .start(manager.scheduler())
            .wait(),
    );
    assert!(outcome.is_success());
    assert!(modified.exists());
    assert_eq!(client.calls(), vec!["discard Assets/old.txt".to_string()]);
}

#[test]
fn locks_refresh_needs_a_remote() {
    let repo = TestRepo::new("main", &[]);
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());
    assert!(manager.update_cache(CacheType::GitLocks).is_none());
    assert!(!manager.container().needs_validation(CacheType::GitLocks));

    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    client.set_locks(vec![GitLock {
        id: "7".into(),
        path: "Assets/hero.fbx".into(),
        owner: "someone".into(),
        locked_at: None,
    }]);
    let manager = common::manager(&repo, client.clone());
    let outcome = block_on(manager.lock_file("Assets/hero.fbx").start(manager.scheduler()).wait());
    assert!(outcome.is_success());
    wait_until("locks refresh after lock", || {
        manager.container().git_locks().data.len() == 1
    });
    assert!(client.ops().contains(&"locks".to_string()));
}

#[test]
fn ahead_behind_needs_tracking() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    client.set_ahead_behind(3, 1);
    let manager = manager(&repo, client.clone());
    let handle = manager.update_cache(CacheType::GitAheadBehind).unwrap();
    assert!(block_on(handle.wait()).is_success());
    let data = manager.container().git_ahead_behind().data;
    assert_eq!((data.ahead, data.behind), (3, 1));

    let repo = TestRepo::new("main", &["origin"]);
    let client = FakeGitClient::new();
    client.set_ahead_behind(3, 1);
    let manager = common::manager(&repo, client.clone());
    let handle = manager.update_cache(CacheType::GitAheadBehind).unwrap();
    assert!(block_on(handle.wait()).is_success());
    let data = manager.container().git_ahead_behind().data;
    assert_eq!((data.ahead, data.behind), (0, 0));
    assert!(!client.ops().contains(&"rev-list".to_string()));
}

#[test]
fn push_defaults_to_current_branch_and_remote() {
    let repo = TestRepo::tracking_main();
    let client = FakeGitClient::new();
    let manager = manager(&repo, client.clone());
    block_on(manager.push(None, None).start(manager.scheduler()).wait());
    assert_eq!(client.calls(), vec!["push origin main".to_string()]);

    let repo = TestRepo::new("main", &[]);
    let manager = common::manager(&repo, FakeGitClient::new());
    let outcome = block_on(manager.push(None, None).start(manager.scheduler()).wait());
    assert!(matches!(outcome, TaskOutcome::Faulted(_)));
    assert!(!manager.is_busy());
}

#[test]
fn facade_observers_see_each_update_once() {
    let repo = TestRepo::tracking_main();
    let manager = manager(&repo, FakeGitClient::new());
    initialized(&manager);

    let first = Repository::new(manager.clone());
    assert!(first.check_and_raise_events_if_cache_newer(CacheType::GitStatus).is_some());
    assert!(first.check_and_raise_events_if_cache_newer(CacheType::GitStatus).is_none());

    let late = Repository::new(manager.clone());
    assert!(late.check_and_raise_events_if_cache_newer(CacheType::GitStatus).is_some());
    assert_eq!(first.current_branch().map(|b| b.name).as_deref(), Some("main"));
    assert_eq!(first.current_remote().map(|r| r.name).as_deref(), Some("origin"));
}

#[test]
fn cache_snapshot_round_trips_through_settings() {
    let repo = TestRepo::tracking_main();
    let manager = manager(&repo, FakeGitClient::new());
    initialized(&manager);

    let store = MemorySettingsStore::new();
    manager.save_caches(&store).unwrap();

    let fresh = common::manager(&repo, FakeGitClient::new());
    let restored = fresh.load_caches(&store as &dyn SettingsStore).unwrap();
    assert!(restored.iter().any(|e| e.cache_type == CacheType::RepositoryInfo));
    assert_eq!(
        fresh.container().repository_info().data,
        manager.container().repository_info().data
    );
}
