//! Locating and validating the git and git-lfs executables.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use gitkeeper_core::config::GitToolConfig;
use gitkeeper_core::error::TaskError;
use gitkeeper_core::git::{
    GitInstallationState, GitVersion, MINIMUM_GIT_LFS_VERSION, MINIMUM_GIT_VERSION,
};
use gitkeeper_core::process::{FirstLineOutputProcessor, ProcessSpec, ProcessTask};
use gitkeeper_core::settings::SettingsStore;
use gitkeeper_core::task::{Task, TaskAffinity, TaskContext};

#[cfg(windows)]
const EXE_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
const EXE_SUFFIX: &str = "";

/// Resolves executables from configured paths or the search path.
#[derive(Debug, Clone)]
pub struct GitInstallationFinder {
    git_path: Option<PathBuf>,
    lfs_path: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl GitInstallationFinder {
    pub fn new(cfg: &GitToolConfig) -> Self {
        let expand = |p: &Option<String>| {
            p.as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| PathBuf::from(shellexpand::tilde(s).into_owned()))
        };
        Self {
            git_path: expand(&cfg.git_path),
            lfs_path: expand(&cfg.lfs_path),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Replace the inherited `PATH` used for lookups.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn find_git(&self) -> Option<PathBuf> {
        match &self.git_path {
            Some(p) => p.is_file().then(|| p.clone()),
            None => self.lookup("git"),
        }
    }

    /// Configured path, then next to git, then the search path.
    pub fn find_lfs(&self, git: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = &self.lfs_path {
            return p.is_file().then(|| p.clone());
        }
        let beside_git = git
            .and_then(Path::parent)
            .map(|dir| dir.join(format!("git-lfs{EXE_SUFFIX}")))
            .filter(|p| p.is_file());
        beside_git.or_else(|| self.lookup("git-lfs"))
    }

    fn lookup(&self, name: &str) -> Option<PathBuf> {
        let file = format!("{name}{EXE_SUFFIX}");
        let search = self.search_path.as_ref()?;
        std::env::split_paths(search)
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
    }
}

/// Install directory for an executable in `<install>/bin/<exe>` or
/// `<install>/cmd/<exe>` layouts; the executable's own directory otherwise.
fn install_dir(exe: &Path) -> Option<PathBuf> {
    let dir = exe.parent()?;
    match dir.file_name().and_then(|n| n.to_str()) {
        Some("bin" | "cmd") => dir.parent().map(Path::to_path_buf),
        _ => Some(dir.to_path_buf()),
    }
}

async fn probe_version(ctx: &TaskContext, exe: &Path, arg: &str) -> Option<GitVersion> {
    let task = ProcessTask::new(ProcessSpec::new(exe).arg(arg), FirstLineOutputProcessor::new());
    match task.run(ctx.clone()).await {
        Ok(Some(banner)) => {
            let version = GitVersion::parse(&banner);
            if version.is_none() {
                tracing::warn!(target: "gitkeeper.process", exe = %exe.display(), %banner, "unrecognized version banner");
            }
            version
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(target: "gitkeeper.process", exe = %exe.display(), error = %e, "version probe failed");
            None
        }
    }
}

/// Find both executables, ask each for its version and check the minimums.
pub fn find_installation(finder: GitInstallationFinder) -> Task<GitInstallationState> {
    Task::new("validate git installation", TaskAffinity::Concurrent, move |ctx| async move {
        let mut state = GitInstallationState::default();

        if let Some(git) = finder.find_git() {
            state.git_version = probe_version(&ctx, &git, "--version").await;
            state.git_install_path = install_dir(&git);
            state.git_executable_path = Some(git);
        }
        ctx.check_cancelled()?;

        let lfs = finder.find_lfs(state.git_executable_path.as_deref());
        if let Some(lfs) = lfs {
            state.git_lfs_version = probe_version(&ctx, &lfs, "version").await;
            state.git_lfs_install_path = install_dir(&lfs);
            state.git_lfs_executable_path = Some(lfs);
        }
        ctx.check_cancelled()?;

        state.git_is_valid = state.git_version.is_some_and(|v| v >= MINIMUM_GIT_VERSION);
        state.git_lfs_is_valid = state
            .git_lfs_version
            .is_some_and(|v| v >= MINIMUM_GIT_LFS_VERSION);
        state.last_validated = Some(Utc::now());

        tracing::info!(
            target: "gitkeeper.process",
            git = ?state.git_executable_path,
            git_version = ?state.git_version,
            lfs_version = ?state.git_lfs_version,
            valid = state.is_valid(),
            "git installation validated"
        );
        Ok(state)
    })
}

/// Reuse the persisted installation while its executables still exist;
/// otherwise validate again and persist the result.
pub fn ensure_installation(
    finder: GitInstallationFinder,
    store: Arc<dyn SettingsStore>,
) -> Task<GitInstallationState> {
    let cached = match GitInstallationState::load(store.as_ref()) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(target: "gitkeeper.config", error = %e, "ignoring stored git installation");
            None
        }
    };
    let still_there = |p: &Option<PathBuf>| p.as_deref().is_some_and(Path::is_file);
    if let Some(state) = cached.filter(|s| {
        s.is_valid() && still_there(&s.git_executable_path) && still_there(&s.git_lfs_executable_path)
    }) {
        return Task::ready("stored git installation", state);
    }

    find_installation(finder).then("persist git installation", TaskAffinity::None, move |_, state| async move {
        state
            .save(store.as_ref())
            .map_err(|e| TaskError::faulted(format!("saving git installation: {e}")))?;
        Ok(state)
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use gitkeeper_core::config::SchedulerConfig;
    use gitkeeper_core::settings::MemorySettingsStore;
    use gitkeeper_core::task::{TaskScheduler, UiContext};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, banner: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\necho '{banner}'\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn scheduler() -> TaskScheduler {
        let cfg = SchedulerConfig {
            worker_threads: Some(1),
            ..SchedulerConfig::default()
        };
        TaskScheduler::new(&cfg, UiContext::new()).unwrap()
    }

    #[test]
    fn finds_tools_on_search_path_and_checks_minimums() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        script(&bin, "git", "git version 2.43.0");
        script(&bin, "git-lfs", "git-lfs/2.3.1 (GitHub; linux amd64; go 1.9)");

        let finder = GitInstallationFinder::new(&GitToolConfig::default()).with_search_path(&bin);
        let state = find_installation(finder)
            .run_synchronously(&scheduler())
            .unwrap()
            .unwrap();

        assert_eq!(state.git_executable_path, Some(bin.join("git")));
        assert_eq!(state.git_install_path.as_deref(), Some(dir.path()));
        assert_eq!(state.git_version, Some(GitVersion::new(2, 43, 0)));
        assert!(state.git_is_valid);
        assert_eq!(state.git_lfs_version, Some(GitVersion::new(2, 3, 1)));
        assert!(!state.git_lfs_is_valid);
        assert!(!state.is_valid());
    }

    #[test]
    fn valid_state_is_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "git", "git version 2.40.1");
        script(dir.path(), "git-lfs", "git-lfs/3.4.0 (GitHub; linux amd64; go 1.21)");
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let finder = GitInstallationFinder::new(&GitToolConfig::default()).with_search_path(dir.path());

        let first = ensure_installation(finder.clone(), store.clone())
            .run_synchronously(&scheduler())
            .unwrap()
            .unwrap();
        assert!(first.is_valid());
        assert_eq!(GitInstallationState::load(store.as_ref()).unwrap(), Some(first.clone()));

        let again = ensure_installation(finder, store.clone());
        assert_eq!(again.name(), "stored git installation");
        assert_eq!(again.run_synchronously(&scheduler()).unwrap(), Some(first));
    }

    #[test]
    fn missing_tools_leave_an_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GitToolConfig {
            git_path: Some(dir.path().join("nope").to_string_lossy().to_string()),
            ..GitToolConfig::default()
        };
        let finder = GitInstallationFinder::new(&cfg).with_search_path(dir.path());
        let state = find_installation(finder)
            .run_synchronously(&scheduler())
            .unwrap()
            .unwrap();
        assert_eq!(state.git_executable_path, None);
        assert_eq!(state.git_lfs_executable_path, None);
        assert!(!state.is_valid());
        assert!(state.last_validated.is_some());
    }
}
