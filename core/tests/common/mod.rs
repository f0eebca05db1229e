#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use git2::{Commit, Oid, Signature};
use gitkeeper_core::config::{AppConfig, SchedulerConfig};
use gitkeeper_core::error::TaskError;
use gitkeeper_core::git::{
    GitAheadBehindStatus, GitClient, GitFileLog, GitLock, GitLogEntry, GitStatus, GitUser,
};
use gitkeeper_core::repository::{RepositoryManager, RepositoryPathConfiguration};
use gitkeeper_core::task::{Task, TaskAffinity, TaskScheduler, UiContext};

pub fn scheduler() -> TaskScheduler {
    let cfg = SchedulerConfig {
        worker_threads: Some(2),
        ..SchedulerConfig::default()
    };
    TaskScheduler::new(&cfg, UiContext::new()).unwrap()
}

pub fn app_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.watcher.enabled = false;
    cfg
}

/// A real repository: one empty commit on `head_branch` plus named remotes.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new(head_branch: &str, remotes: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.set_head(&format!("refs/heads/{head_branch}")).unwrap();
        commit_on_head(&repo, "init");
        for name in remotes {
            repo.remote(name, &format!("https://example.com/{name}.git")).unwrap();
        }
        Self { dir }
    }

    /// `main` tracking `origin/main`.
    pub fn tracking_main() -> Self {
        let test = Self::new("main", &["origin"]);
        let repo = test.repo();
        let head = repo.refname_to_id("refs/heads/main").unwrap();
        repo.reference("refs/remotes/origin/main", head, false, "fetch").unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("branch.main.remote", "origin").unwrap();
        config.set_str("branch.main.merge", "refs/heads/main").unwrap();
        test
    }

    pub fn repo(&self) -> git2::Repository {
        git2::Repository::open(self.path()).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git_path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(".git").join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn paths(&self) -> RepositoryPathConfiguration {
        RepositoryPathConfiguration::new(self.path())
    }
}

/// Commit the empty tree on HEAD, on top of whatever HEAD points at.
pub fn commit_on_head(repo: &git2::Repository, message: &str) -> Oid {
    let sig = Signature::now("Tester", "tester@example.com").unwrap();
    let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
}

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Records every call and answers from canned values. Reads run on the
/// concurrent lane, mutations on the exclusive one.
#[derive(Default)]
pub struct FakeGitClient {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    status: Mutex<GitStatus>,
    ahead_behind: Mutex<GitAheadBehindStatus>,
    locks: Mutex<Vec<GitLock>>,
    hook: Mutex<Option<Hook>>,
}

impl FakeGitClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn succeed(&self, op: &str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub fn set_status(&self, status: GitStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_ahead_behind(&self, ahead: u32, behind: u32) {
        *self.ahead_behind.lock().unwrap() = GitAheadBehindStatus { ahead, behind };
    }

    pub fn set_locks(&self, locks: Vec<GitLock>) {
        *self.locks.lock().unwrap() = locks;
    }

    /// Called with the op name from inside every mutation body.
    pub fn on_mutation<F: Fn(&str) + Send + Sync + 'static>(&self, hook: F) {
        *self.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    fn failure(&self, op: &str) -> Option<TaskError> {
        self.failing
            .lock()
            .unwrap()
            .contains(op)
            .then(|| TaskError::Process {
                program: "git".into(),
                exit_code: 1,
                stderr: format!("{op} failed"),
            })
    }

    fn read<T: Send + 'static>(&self, op: &str, value: T) -> Task<T> {
        let calls = self.calls.clone();
        let failure = self.failure(op);
        let op = op.to_string();
        Task::from_fn(op.clone(), TaskAffinity::Concurrent, move |_| {
            calls.lock().unwrap().push(op);
            match failure {
                Some(e) => Err(e),
                None => Ok(value),
            }
        })
    }

    fn mutation(&self, op: &str, detail: String) -> Task<String> {
        let calls = self.calls.clone();
        let failure = self.failure(op);
        let hook = self.hook.lock().unwrap().clone();
        let op = op.to_string();
        Task::from_fn(op.clone(), TaskAffinity::Exclusive, move |_| {
            calls
                .lock()
                .unwrap()
                .push(format!("{op} {detail}").trim_end().to_string());
            if let Some(hook) = hook {
                hook(&op);
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(format!("{op} done")),
            }
        })
    }
}

impl GitClient for FakeGitClient {
    fn status(&self) -> Task<GitStatus> {
        self.read("status", self.status.lock().unwrap().clone())
    }

    fn log(&self, _limit: Option<usize>) -> Task<Vec<GitLogEntry>> {
        self.read("log", Vec::new())
    }

    fn file_log(&self, path: &str) -> Task<GitFileLog> {
        self.read(
            "file-log",
            GitFileLog {
                path: path.to_string(),
                entries: Vec::new(),
            },
        )
    }

    fn ahead_behind(&self, _local: &str, _tracking: &str) -> Task<GitAheadBehindStatus> {
        self.read("rev-list", *self.ahead_behind.lock().unwrap())
    }

    fn list_locks(&self, _remote: &str) -> Task<Vec<GitLock>> {
        self.read("locks", self.locks.lock().unwrap().clone())
    }

    fn user(&self) -> Task<GitUser> {
        self.read(
            "user",
            GitUser {
                name: Some("Tester".into()),
                email: Some("tester@example.com".into()),
            },
        )
    }

    fn add(&self, files: &[String]) -> Task<String> {
        self.mutation("add", files.join(" "))
    }

    fn add_all(&self) -> Task<String> {
        self.mutation("add", "--all".into())
    }

    fn commit(&self, message: &str, _body: Option<&str>) -> Task<String> {
        self.mutation("commit", message.into())
    }

    fn push(&self, remote: &str, branch: &str) -> Task<String> {
        self.mutation("push", format!("{remote} {branch}"))
    }

    fn pull(&self, remote: &str, branch: &str) -> Task<String> {
        self.mutation("pull", format!("{remote} {branch}"))
    }

    fn fetch(&self, remote: &str) -> Task<String> {
        self.mutation("fetch", remote.into())
    }

    fn revert(&self, commit_id: &str) -> Task<String> {
        self.mutation("revert", commit_id.into())
    }

    fn create_branch(&self, branch: &str, base: &str) -> Task<String> {
        self.mutation("branch", format!("{branch} {base}"))
    }

    fn delete_branch(&self, branch: &str, _force: bool) -> Task<String> {
        self.mutation("branch-delete", branch.into())
    }

    fn switch_branch(&self, branch: &str) -> Task<String> {
        self.mutation("switch", branch.into())
    }

    fn lock(&self, file: &str) -> Task<String> {
        self.mutation("lock", file.into())
    }

    fn unlock(&self, file: &str, _force: bool) -> Task<String> {
        self.mutation("unlock", file.into())
    }

    fn discard(&self, files: &[String]) -> Task<String> {
        self.mutation("discard", files.join(" "))
    }

    fn discard_all(&self) -> Task<String> {
        self.mutation("discard", "--all".into())
    }

    fn checkout_version(&self, commit_id: &str, files: &[String]) -> Task<String> {
        self.mutation("checkout", format!("{commit_id} {}", files.join(" ")))
    }

    fn remote_add(&self, name: &str, url: &str) -> Task<String> {
        self.mutation("remote-add", format!("{name} {url}"))
    }

    fn remote_remove(&self, name: &str) -> Task<String> {
        self.mutation("remote-remove", name.into())
    }
}

pub fn manager(repo: &TestRepo, client: Arc<FakeGitClient>) -> RepositoryManager {
    RepositoryManager::new(repo.paths(), scheduler(), client, &app_config())
}

/// Initialize and wait for the first refresh of every cache.
pub fn initialized(manager: &RepositoryManager) {
    for handle in manager.initialize().unwrap() {
        futures::executor::block_on(handle.wait());
    }
}

pub fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
