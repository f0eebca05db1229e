//! Everything one CLI invocation needs: config, scheduler, settings and the
//! validated git installation.

use std::path::Path;
use std::sync::Arc;

use gitkeeper_core::config::AppConfig;
use gitkeeper_core::error::CliError;
use gitkeeper_core::git::GitInstallationState;
use gitkeeper_core::repository::RepositoryManager;
use gitkeeper_core::settings::SettingsStore;
use gitkeeper_core::task::{Task, TaskScheduler, UiContext};
use gitkeeper_plugins::factory;
use gitkeeper_plugins::installation::{ensure_installation, find_installation};

use crate::progress::ProgressReporter;

pub struct Session {
    cfg: AppConfig,
    scheduler: TaskScheduler,
    settings: Arc<dyn SettingsStore>,
    show_progress: bool,
}

impl Session {
    pub fn new(cfg: AppConfig, show_progress: bool) -> Result<Self, CliError> {
        let scheduler = TaskScheduler::new(&cfg.scheduler, UiContext::new())?;
        let settings =
            factory::build_settings_store(&cfg).map_err(|e| CliError::Config(format!("{e:#}")))?;
        Ok(Self {
            cfg,
            scheduler,
            settings,
            show_progress,
        })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// Start `task`, cancel it on Ctrl-C and block until it settles.
    pub fn run<T: Send + 'static>(&self, task: Task<T>) -> Result<Option<T>, CliError> {
        let reporter = self.show_progress.then(|| ProgressReporter::attach(&self.scheduler));
        let name = task.name().to_string();
        let handle = task.start(&self.scheduler);

        let token = handle.token().clone();
        let interrupt = self.scheduler.handle().spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(target: "gitkeeper.task", "interrupted; canceling");
                token.cancel();
            }
        });

        let outcome = handle.wait_blocking();
        interrupt.abort();
        if let Some(reporter) = reporter {
            reporter.finish();
        }
        tracing::debug!(target: "gitkeeper.task", task = %name, success = outcome.is_success(), "task settled");
        Ok(outcome.into_result()?)
    }

    pub fn installation(&self, refresh: bool) -> Result<GitInstallationState, CliError> {
        let finder = factory::build_installation_finder(&self.cfg);
        let task = if refresh {
            let store = self.settings.clone();
            find_installation(finder).then(
                "persist git installation",
                gitkeeper_core::task::TaskAffinity::None,
                move |_, state| async move {
                    if let Err(e) = state.save(store.as_ref()) {
                        tracing::warn!(target: "gitkeeper.config", error = %e, "could not persist git installation");
                    }
                    Ok(state)
                },
            )
        } else {
            ensure_installation(finder, self.settings.clone())
        };
        let state = self.run(task)?.unwrap_or_default();
        if !state.is_valid() {
            tracing::warn!(
                target: "gitkeeper.config",
                git = ?state.git_version,
                lfs = ?state.git_lfs_version,
                "git installation is missing or older than supported"
            );
        }
        Ok(state)
    }

    /// Manager for the repository around `start`, with cached data restored.
    pub fn repository(&self, start: &Path) -> Result<RepositoryManager, CliError> {
        let installation = self.installation(false)?;
        let manager = factory::build_repository_manager(
            &self.cfg,
            start,
            self.scheduler.clone(),
            &installation,
        )
        .map_err(|e| CliError::Command(format!("{e:#}")))?;
        if let Err(e) = manager.load_caches(self.settings()) {
            tracing::warn!(target: "gitkeeper.cache", error = %e, "ignoring stored cache snapshot");
        }
        Ok(manager)
    }

    pub fn shutdown(self) {
        self.scheduler.dispose();
    }
}
