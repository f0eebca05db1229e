use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::GitVersion;
use crate::error::SettingsError;
use crate::settings::SettingsStore;

pub const MINIMUM_GIT_VERSION: GitVersion = GitVersion::new(2, 11, 0);
pub const MINIMUM_GIT_LFS_VERSION: GitVersion = GitVersion::new(2, 4, 0);

/// Discovered git / git-lfs binaries and whether they passed validation.
///
/// Persisted as one value; equality and hashing cover every field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitInstallationState {
    pub git_executable_path: Option<PathBuf>,
    pub git_install_path: Option<PathBuf>,
    pub git_lfs_executable_path: Option<PathBuf>,
    pub git_lfs_install_path: Option<PathBuf>,
    pub git_version: Option<GitVersion>,
    pub git_lfs_version: Option<GitVersion>,
    pub git_is_valid: bool,
    pub git_lfs_is_valid: bool,
    pub last_validated: Option<DateTime<Utc>>,
}

impl GitInstallationState {
    pub const SETTINGS_KEY: &'static str = "git.installation";

    pub fn is_valid(&self) -> bool {
        self.git_is_valid && self.git_lfs_is_valid
    }

    /// Executable to launch for git, falling back to a PATH lookup by name.
    pub fn git_program(&self) -> PathBuf {
        self.git_executable_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("git"))
    }

    pub fn load(store: &dyn SettingsStore) -> Result<Option<Self>, SettingsError> {
        store.get(Self::SETTINGS_KEY)
    }

    pub fn save(&self, store: &dyn SettingsStore) -> Result<(), SettingsError> {
        store.set(Self::SETTINGS_KEY, self)
    }
}
