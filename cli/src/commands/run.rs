//! Executes one parsed subcommand against a [`Session`].

use std::path::PathBuf;
use std::time::Duration;

use gitkeeper_core::cache::CacheType;
use gitkeeper_core::error::CliError;
use gitkeeper_core::git::GitStatusEntry;
use gitkeeper_core::repository::RepositoryManager;
use gitkeeper_core::task::Task;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::cli::{Args, Commands, DiscardArgs, WatchArgs};
use crate::render;
use crate::session::Session;

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize + ?Sized>(&self, value: &T, lines: impl FnOnce(&T) -> Vec<String>) {
        if self.json {
            println!("{}", render::to_json(value));
        } else {
            for line in lines(value) {
                println!("{line}");
            }
        }
    }

    fn done(&self, what: &str, detail: Option<String>) {
        let detail = detail.unwrap_or_default();
        if self.json {
            println!(
                "{}",
                render::to_json(&serde_json::json!({ "operation": what, "output": detail }))
            );
        } else if detail.trim().is_empty() {
            println!("{what}: done");
        } else {
            println!("{}", detail.trim_end());
        }
    }
}

fn repo_root(args: &Args) -> Result<PathBuf, CliError> {
    match &args.repo {
        Some(p) => Ok(p.clone()),
        None => Ok(std::env::current_dir()?),
    }
}

pub fn dispatch(args: Args, session: &Session) -> Result<i32, CliError> {
    let out = Output { json: args.json };

    if let Commands::Installation { refresh } = &args.command {
        let state = session.installation(*refresh)?;
        out.emit(&state, render::installation_lines);
        return Ok(if state.is_valid() { 0 } else { 20 });
    }

    let root = repo_root(&args)?;
    let manager = session.repository(&root)?;
    let code = match args.command {
        Commands::Installation { .. } => 0,
        Commands::Status => {
            let status = session.run(manager.client().status())?.unwrap_or_default();
            out.emit(&status, render::status_lines);
            0
        }
        Commands::Log { limit } => {
            let log = session.run(manager.client().log(limit))?.unwrap_or_default();
            out.emit(log.as_slice(), render::log_lines);
            0
        }
        Commands::FileLog { path } => {
            let log = session.run(manager.client().file_log(&path))?.unwrap_or_default();
            out.emit(&log, |l| render::log_lines(&l.entries));
            0
        }
        Commands::Branches => {
            if let Some(handle) = manager.update_cache(CacheType::Branches) {
                handle.wait_blocking().into_result()?;
            }
            let branches = manager.container().branches().data;
            out.emit(&branches, render::branch_lines);
            0
        }
        Commands::Locks => {
            let (_, remote) = manager.current_branch_and_remote()?;
            let remote = remote.ok_or_else(|| {
                CliError::Command("no remote configured; locks live on a remote".to_string())
            })?;
            let locks = session
                .run(manager.client().list_locks(&remote.name))?
                .unwrap_or_default();
            out.emit(locks.as_slice(), render::lock_lines);
            0
        }
        Commands::Commit(c) => {
            let task = if c.files.is_empty() {
                manager.commit_all_files(&c.message, c.body.as_deref())
            } else {
                manager.commit_files(&c.files, &c.message, c.body.as_deref())
            };
            mutate(session, &out, &manager, "commit", task)?
        }
        Commands::Push(p) => {
            let task = manager.push(p.remote.as_deref(), p.branch.as_deref());
            mutate(session, &out, &manager, "push", task)?
        }
        Commands::Pull(p) => {
            let task = manager.pull(p.remote.as_deref(), p.branch.as_deref());
            mutate(session, &out, &manager, "pull", task)?
        }
        Commands::Fetch { remote } => {
            let task = manager.fetch(remote.as_deref());
            mutate(session, &out, &manager, "fetch", task)?
        }
        Commands::Switch { branch } => {
            let task = manager.switch_branch(&branch);
            mutate(session, &out, &manager, "switch", task)?
        }
        Commands::Branch { name, base } => {
            let task = manager.create_branch(&name, &base);
            mutate(session, &out, &manager, "branch", task)?
        }
        Commands::Discard(d) => discard(session, &out, &manager, d)?,
        Commands::Lock { path } => {
            let task = manager.lock_file(&path);
            mutate(session, &out, &manager, "lock", task)?
        }
        Commands::Unlock { path, force } => {
            let task = manager.unlock_file(&path, force);
            mutate(session, &out, &manager, "unlock", task)?
        }
        Commands::Watch(w) => watch(session, &out, &manager, w)?,
    };

    if let Err(e) = manager.save_caches(session.settings()) {
        tracing::warn!(target: "gitkeeper.cache", error = %e, "could not store cache snapshot");
    }
    Ok(code)
}

fn mutate(
    session: &Session,
    out: &Output,
    manager: &RepositoryManager,
    what: &str,
    task: Task<String>,
) -> Result<i32, CliError> {
    let detail = session.run(task)?;
    out.done(what, detail);
    tracing::debug!(target: "gitkeeper.repository", operation = what, busy = manager.is_busy(), "operation finished");
    Ok(0)
}

/// Match requested paths against the current status, so untracked files are
/// deleted and tracked ones restored.
pub fn select_entries(
    entries: &[GitStatusEntry],
    requested: &[String],
) -> Result<Vec<GitStatusEntry>, CliError> {
    let normalize = |p: &str| p.trim_start_matches("./").replace('\\', "/");
    let mut picked = Vec::with_capacity(requested.len());
    for want in requested {
        let want = normalize(want);
        let entry = entries
            .iter()
            .find(|e| e.path == want)
            .ok_or_else(|| CliError::Command(format!("{want}: no changes to discard")))?;
        picked.push(entry.clone());
    }
    Ok(picked)
}

fn discard(
    session: &Session,
    out: &Output,
    manager: &RepositoryManager,
    d: DiscardArgs,
) -> Result<i32, CliError> {
    if d.all {
        return mutate(session, out, manager, "discard", manager.discard_all_changes());
    }
    if d.paths.is_empty() {
        return Err(CliError::Command("nothing to discard; pass paths or --all".to_string()));
    }
    let status = session.run(manager.client().status())?.unwrap_or_default();
    let entries = select_entries(&status.entries, &d.paths)?;
    mutate(session, out, manager, "discard", manager.discard_changes(&entries))
}

fn watch(
    session: &Session,
    out: &Output,
    manager: &RepositoryManager,
    w: WatchArgs,
) -> Result<i32, CliError> {
    let mut events = manager.subscribe();
    for handle in manager.initialize()? {
        handle.wait_blocking();
    }
    manager.start()?;
    tracing::info!(
        target: "gitkeeper.watcher",
        repository = %manager.paths().repository_path.display(),
        "watching; press Ctrl-C to stop"
    );

    let limit = w.seconds.map(Duration::from_secs);
    session.scheduler().handle().block_on(async {
        let deadline = async {
            match limit {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Ok(event) => out.emit(&event, |e| vec![render::event_line(e)]),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "gitkeeper.ui", skipped, "dropped repository events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    manager.stop();
    Ok(0)
}
