use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default gitkeeper data directory: ~/.gitkeeper
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".gitkeeper"))
}

pub fn load_from_str(s: &str) -> anyhow::Result<AppConfig> {
    Ok(toml::from_str::<AppConfig>(s)?)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    load_from_str(&s).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.gitkeeper/config.toml
    let data_dir = get_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    if cfg
        .logging
        .directory
        .as_deref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    if cfg.git.settings_file.is_none() {
        cfg.git.settings_file = Some(data_dir.join("settings.json").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    expand_paths(&mut cfg);
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("GITKEEPER_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = non_empty("GITKEEPER_GIT_PATH") {
        cfg.git.git_path = Some(v);
    }
    if let Some(v) = non_empty("GITKEEPER_LFS_PATH") {
        cfg.git.lfs_path = Some(v);
    }
    if let Some(v) = non_empty("GITKEEPER_WORKER_THREADS") {
        match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => cfg.scheduler.worker_threads = Some(n),
            _ => tracing::warn!(target: "gitkeeper.config", value = %v, "ignoring invalid GITKEEPER_WORKER_THREADS"),
        }
    }
    if let Some(v) = non_empty("GITKEEPER_POLL_INTERVAL_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.watcher.poll_interval_ms = ms,
            Err(_) => tracing::warn!(target: "gitkeeper.config", value = %v, "ignoring invalid GITKEEPER_POLL_INTERVAL_MS"),
        }
    }
}

fn expand_paths(cfg: &mut AppConfig) {
    for slot in [
        &mut cfg.logging.directory,
        &mut cfg.git.git_path,
        &mut cfg.git.lfs_path,
        &mut cfg.git.settings_file,
    ] {
        if let Some(path) = slot.as_mut() {
            *path = shellexpand::tilde(path.as_str()).into_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::cache::CacheType;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let cfg = load_from_str(
            r#"
            [watcher]
            poll_interval_ms = 50

            [cache]
            locks_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(cfg.watcher.poll_interval(), Duration::from_millis(50));
        assert!(cfg.watcher.enabled);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.scheduler.progress_channel_capacity, 256);
        assert_eq!(
            cfg.cache.timeout_for(CacheType::GitLocks),
            Some(Duration::from_secs(30))
        );
        assert_eq!(cfg.cache.timeout_for(CacheType::GitStatus), None);
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("GITKEEPER_LOG_LEVEL", "debug"),
            ("GITKEEPER_GIT_PATH", "/opt/git/bin/git"),
            ("GITKEEPER_WORKER_THREADS", "zero"),
            ("GITKEEPER_LFS_PATH", "  "),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.git.git_path.as_deref(), Some("/opt/git/bin/git"));
        assert_eq!(cfg.git.lfs_path, None);
        assert_eq!(cfg.scheduler.worker_threads, None);
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watcher\npoll_interval_ms = 1").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
