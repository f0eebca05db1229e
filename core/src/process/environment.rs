use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use tokio::process::Command;

use crate::git::GitInstallationState;

/// Environment overrides applied on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnvironment {
    vars: BTreeMap<String, String>,
    path_prefixes: Vec<PathBuf>,
    removed: Vec<String>,
}

impl ProcessEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment for git invocations. The validated executables' directories
    /// go first on PATH, terminal prompts are disabled and inherited
    /// repository overrides are dropped.
    pub fn for_git(installation: &GitInstallationState) -> Self {
        let mut env = Self::new()
            .set("GIT_TERMINAL_PROMPT", "0")
            .set("GIT_PAGER", "cat")
            .set("LC_ALL", "C")
            .remove("GIT_DIR")
            .remove("GIT_WORK_TREE")
            .remove("GIT_INDEX_FILE");

        let exe_dirs = [
            installation.git_executable_path.as_ref(),
            installation.git_lfs_executable_path.as_ref(),
        ];
        for dir in exe_dirs.into_iter().flatten().filter_map(|p| p.parent()) {
            if !dir.as_os_str().is_empty() {
                env = env.prepend_path(dir);
            }
        }
        env
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.removed.retain(|k| *k != key);
        self.vars.insert(key, value.into());
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.vars.remove(&key);
        if !self.removed.contains(&key) {
            self.removed.push(key);
        }
        self
    }

    pub fn prepend_path(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !self.path_prefixes.contains(&dir) {
            self.path_prefixes.push(dir);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// PATH with the prefixes in front of `inherited`.
    pub fn joined_path(&self, inherited: Option<OsString>) -> Option<OsString> {
        if self.path_prefixes.is_empty() {
            return None;
        }
        let mut dirs = self.path_prefixes.clone();
        if let Some(inherited) = inherited {
            dirs.extend(std::env::split_paths(&inherited));
        }
        std::env::join_paths(dirs).ok()
    }

    pub fn apply(&self, cmd: &mut Command) {
        for key in &self.removed {
            cmd.env_remove(key);
        }
        cmd.envs(&self.vars);
        if let Some(path) = self.joined_path(std::env::var_os("PATH")) {
            cmd.env("PATH", path);
        }
    }
}
