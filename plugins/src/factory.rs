use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use gitkeeper_core::config::AppConfig;
use gitkeeper_core::git::{GitClient, GitInstallationState};
use gitkeeper_core::repository::{RepositoryManager, RepositoryPathConfiguration};
use gitkeeper_core::settings::{MemorySettingsStore, SettingsStore};
use gitkeeper_core::task::TaskScheduler;

use crate::file_settings::FileSettingsStore;
use crate::git::ProcessGitClient;
use crate::installation::GitInstallationFinder;

pub fn build_settings_store(cfg: &AppConfig) -> Result<Arc<dyn SettingsStore>> {
    match cfg.git.settings_file.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let path = shellexpand::tilde(path).into_owned();
            Ok(Arc::new(FileSettingsStore::open(&path)?))
        }
        None => {
            tracing::debug!(target: "gitkeeper.config", "no settings file configured; settings are kept in memory");
            Ok(Arc::new(MemorySettingsStore::new()))
        }
    }
}

pub fn build_installation_finder(cfg: &AppConfig) -> GitInstallationFinder {
    GitInstallationFinder::new(&cfg.git)
}

pub fn build_git_client(root: &Path, installation: &GitInstallationState) -> Arc<dyn GitClient> {
    Arc::new(ProcessGitClient::new(root, installation))
}

/// Manager for the repository containing `start`.
pub fn build_repository_manager(
    cfg: &AppConfig,
    start: &Path,
    scheduler: TaskScheduler,
    installation: &GitInstallationState,
) -> Result<RepositoryManager> {
    let paths = RepositoryPathConfiguration::discover(start)
        .with_context(|| format!("{} is not inside a git repository", start.display()))?;
    let client = build_git_client(&paths.repository_path, installation);
    Ok(RepositoryManager::new(paths, scheduler, client, cfg))
}
