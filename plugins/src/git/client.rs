use std::path::{Path, PathBuf};

use gitkeeper_core::error::TaskError;
use gitkeeper_core::git::{
    GitAheadBehindStatus, GitClient, GitFileLog, GitInstallationState, GitLock, GitLogEntry,
    GitStatus, GitUser,
};
use gitkeeper_core::process::{
    ListOutputProcessor, OutputProcessor, ProcessEnvironment, ProcessSpec, ProcessTask,
    SimpleOutputProcessor,
};
use gitkeeper_core::task::{Task, TaskAffinity};

use super::locks::LocksOutputProcessor;
use super::log::{LogEntryParser, LOG_FORMAT};
use super::status::StatusOutputProcessor;

/// [`GitClient`] backed by the git command line.
///
/// Every call builds a fresh process task rooted at the repository; reads
/// run on the concurrent lane, mutations on the exclusive one.
#[derive(Debug, Clone)]
pub struct ProcessGitClient {
    root: PathBuf,
    program: PathBuf,
    environment: ProcessEnvironment,
}

impl ProcessGitClient {
    pub fn new(root: impl Into<PathBuf>, installation: &GitInstallationState) -> Self {
        Self {
            root: root.into(),
            program: installation.git_program(),
            environment: ProcessEnvironment::for_git(installation),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn spec<I, S>(&self, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessSpec::new(&self.program)
            .args(args)
            .current_dir(&self.root)
            .environment(self.environment.clone())
    }

    fn read<P: OutputProcessor>(&self, name: &str, args: Vec<String>, processor: P) -> Task<P::Output> {
        ProcessTask::new(self.spec(args), processor).into_task(name, TaskAffinity::Concurrent)
    }

    fn mutate(&self, name: &str, args: Vec<String>) -> Task<String> {
        ProcessTask::new(self.spec(args), SimpleOutputProcessor::new())
            .into_task(name, TaskAffinity::Exclusive)
    }
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| s.to_string()).collect()
}

/// `git rev-list --left-right --count a...b` prints `<ahead>\t<behind>`.
pub fn parse_ahead_behind(output: &str) -> Result<GitAheadBehindStatus, TaskError> {
    let mut nums = output.split_whitespace().map(str::parse::<u32>);
    match (nums.next(), nums.next()) {
        (Some(Ok(ahead)), Some(Ok(behind))) => Ok(GitAheadBehindStatus { ahead, behind }),
        _ => Err(TaskError::Parse(format!(
            "unexpected rev-list output: {:?}",
            output.trim()
        ))),
    }
}

/// `git config --get-regexp ^user\.` prints `user.name Jane Doe` per line.
pub fn parse_user(output: &str) -> GitUser {
    let mut user = GitUser::default();
    for line in output.lines() {
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        match key.to_ascii_lowercase().as_str() {
            "user.name" => user.name = value,
            "user.email" => user.email = value,
            _ => {}
        }
    }
    user
}

impl GitClient for ProcessGitClient {
    fn status(&self) -> Task<GitStatus> {
        self.read(
            "git status",
            args(["-c", "core.quotepath=false", "status", "--porcelain", "-b", "-u"]),
            StatusOutputProcessor::new(&self.root),
        )
    }

    fn log(&self, limit: Option<usize>) -> Task<Vec<GitLogEntry>> {
        let mut a = args(["-c", "core.quotepath=false", "log", LOG_FORMAT, "--name-status"]);
        if let Some(n) = limit {
            a.push(format!("--max-count={n}"));
        }
        self.read("git log", a, ListOutputProcessor::new(LogEntryParser::new(&self.root)))
    }

    fn file_log(&self, path: &str) -> Task<GitFileLog> {
        let mut a = args(["-c", "core.quotepath=false", "log", LOG_FORMAT, "--name-status", "--follow", "--"]);
        a.push(path.to_string());
        let path = path.to_string();
        self.read("git file log", a, ListOutputProcessor::new(LogEntryParser::new(&self.root)))
            .then("collect file log", TaskAffinity::None, move |_, entries| async move {
                Ok(GitFileLog { path, entries })
            })
    }

    fn ahead_behind(&self, local: &str, tracking: &str) -> Task<GitAheadBehindStatus> {
        let mut a = args(["rev-list", "--left-right", "--count"]);
        a.push(format!("{local}...{tracking}"));
        self.read("git rev-list", a, SimpleOutputProcessor::new())
            .then("parse ahead/behind", TaskAffinity::None, |_, out| async move {
                parse_ahead_behind(&out)
            })
    }

    fn list_locks(&self, remote: &str) -> Task<Vec<GitLock>> {
        let mut a = args(["lfs", "locks", "--json"]);
        a.push(format!("--remote={remote}"));
        self.read("git lfs locks", a, LocksOutputProcessor::new())
    }

    fn user(&self) -> Task<GitUser> {
        self.read(
            "git config user",
            args(["config", "--get-regexp", r"^user\.(name|email)$"]),
            SimpleOutputProcessor::new(),
        )
        .then("parse user", TaskAffinity::None, |_, out| async move {
            Ok(parse_user(&out))
        })
        // --get-regexp exits 1 when nothing matched.
        .on_failure("no user configured", TaskAffinity::None, |_, e| async move {
            match e {
                TaskError::Process { exit_code: 1, .. } => Ok(GitUser::default()),
                e => Err(e),
            }
        })
    }

    fn add(&self, files: &[String]) -> Task<String> {
        let mut a = args(["add", "--"]);
        a.extend(files.iter().cloned());
        self.mutate("git add", a)
    }

    fn add_all(&self) -> Task<String> {
        self.mutate("git add all", args(["add", "--all"]))
    }

    fn commit(&self, message: &str, body: Option<&str>) -> Task<String> {
        let mut a = args(["commit", "-m"]);
        a.push(message.to_string());
        if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
            a.push("-m".to_string());
            a.push(body.to_string());
        }
        self.mutate("git commit", a)
    }

    fn push(&self, remote: &str, branch: &str) -> Task<String> {
        let mut a = args(["push", "--progress", "--set-upstream"]);
        a.extend([remote.to_string(), branch.to_string()]);
        self.mutate("git push", a)
    }

    fn pull(&self, remote: &str, branch: &str) -> Task<String> {
        let mut a = args(["pull", "--progress"]);
        a.extend([remote.to_string(), branch.to_string()]);
        self.mutate("git pull", a)
    }

    fn fetch(&self, remote: &str) -> Task<String> {
        let mut a = args(["fetch", "--progress"]);
        a.push(remote.to_string());
        self.mutate("git fetch", a)
    }

    fn revert(&self, commit_id: &str) -> Task<String> {
        let mut a = args(["revert", "--no-edit"]);
        a.push(commit_id.to_string());
        self.mutate("git revert", a)
    }

    fn create_branch(&self, branch: &str, base: &str) -> Task<String> {
        let mut a = args(["branch"]);
        a.extend([branch.to_string(), base.to_string()]);
        self.mutate("git branch", a)
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Task<String> {
        let mut a = args(["branch", if force { "-D" } else { "-d" }]);
        a.push(branch.to_string());
        self.mutate("git branch delete", a)
    }

    fn switch_branch(&self, branch: &str) -> Task<String> {
        let mut a = args(["checkout"]);
        a.push(branch.to_string());
        self.mutate("git checkout branch", a)
    }

    fn lock(&self, file: &str) -> Task<String> {
        let mut a = args(["lfs", "lock"]);
        a.push(file.to_string());
        self.mutate("git lfs lock", a)
    }

    fn unlock(&self, file: &str, force: bool) -> Task<String> {
        let mut a = args(["lfs", "unlock"]);
        if force {
            a.push("--force".to_string());
        }
        a.push(file.to_string());
        self.mutate("git lfs unlock", a)
    }

    fn discard(&self, files: &[String]) -> Task<String> {
        let mut a = args(["checkout", "HEAD", "--"]);
        a.extend(files.iter().cloned());
        self.mutate("git discard", a)
    }

    fn discard_all(&self) -> Task<String> {
        self.mutate("git discard all", args(["reset", "--hard", "HEAD"]))
    }

    fn checkout_version(&self, commit_id: &str, files: &[String]) -> Task<String> {
        let mut a = args(["checkout"]);
        a.push(commit_id.to_string());
        a.push("--".to_string());
        a.extend(files.iter().cloned());
        self.mutate("git checkout version", a)
    }

    fn remote_add(&self, name: &str, url: &str) -> Task<String> {
        let mut a = args(["remote", "add"]);
        a.extend([name.to_string(), url.to_string()]);
        self.mutate("git remote add", a)
    }

    fn remote_remove(&self, name: &str) -> Task<String> {
        let mut a = args(["remote", "remove"]);
        a.push(name.to_string());
        self.mutate("git remote remove", a)
    }
}
