//! Plain-text rendering of repository data for the terminal.

use gitkeeper_core::git::{
    BranchesData, GitFileStatus, GitInstallationState, GitLock, GitLogEntry, GitStatus,
};
use gitkeeper_core::RepositoryManagerEvent;
use serde::Serialize;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

fn status_code(s: GitFileStatus) -> char {
    match s {
        GitFileStatus::None => ' ',
        GitFileStatus::Untracked => '?',
        GitFileStatus::Ignored => '!',
        GitFileStatus::Modified => 'M',
        GitFileStatus::Added => 'A',
        GitFileStatus::Deleted => 'D',
        GitFileStatus::Renamed => 'R',
        GitFileStatus::Copied => 'C',
        GitFileStatus::Unmerged => 'U',
        GitFileStatus::TypeChange => 'T',
    }
}

pub fn status_lines(status: &GitStatus) -> Vec<String> {
    let mut out = Vec::with_capacity(status.entries.len() + 1);
    let branch = status.local_branch.as_deref().unwrap_or("(detached)");
    out.push(match status.remote_branch.as_deref() {
        Some(remote) => format!(
            "On {branch} tracking {remote} (ahead {}, behind {})",
            status.ahead, status.behind
        ),
        None => format!("On {branch}"),
    });
    for e in &status.entries {
        let (x, y) = if e.work_tree_status == GitFileStatus::Untracked {
            ('?', '?')
        } else {
            (status_code(e.index_status), status_code(e.work_tree_status))
        };
        match e.original_path.as_deref() {
            Some(from) => out.push(format!("{x}{y} {from} -> {}", e.path)),
            None => out.push(format!("{x}{y} {}", e.path)),
        }
    }
    out
}

pub fn log_lines(entries: &[GitLogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            format!(
                "{} {} {} <{}> {}",
                e.short_id(),
                e.time.format("%Y-%m-%d %H:%M"),
                e.author_name,
                e.author_email,
                e.summary
            )
        })
        .collect()
}

pub fn branch_lines(data: &BranchesData) -> Vec<String> {
    let local = data.local.iter().map(|b| {
        let marker = if b.is_active { '*' } else { ' ' };
        match b.tracking.as_deref() {
            Some(t) => format!("{marker} {} -> {t}", b.name),
            None => format!("{marker} {}", b.name),
        }
    });
    let remote = data.remote.iter().map(|b| format!("  remotes/{}", b.name));
    local.chain(remote).collect()
}

pub fn lock_lines(locks: &[GitLock]) -> Vec<String> {
    locks
        .iter()
        .map(|l| format!("{}\t{}\tID:{}", l.path, l.owner, l.id))
        .collect()
}

pub fn installation_lines(state: &GitInstallationState) -> Vec<String> {
    let show = |path: &Option<std::path::PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string())
    };
    let version = |v: &Option<gitkeeper_core::git::GitVersion>| {
        v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
    };
    let verdict = |ok: bool| if ok { "ok" } else { "unsupported" };
    vec![
        format!(
            "git     {} ({}, {})",
            show(&state.git_executable_path),
            version(&state.git_version),
            verdict(state.git_is_valid)
        ),
        format!(
            "git-lfs {} ({}, {})",
            show(&state.git_lfs_executable_path),
            version(&state.git_lfs_version),
            verdict(state.git_lfs_is_valid)
        ),
    ]
}

pub fn event_line(event: &RepositoryManagerEvent) -> String {
    match event {
        RepositoryManagerEvent::GitStatusUpdated(s) => {
            format!("status: {} changed file(s)", s.entries.len())
        }
        RepositoryManagerEvent::GitLogUpdated(log) => match log.first() {
            Some(head) => format!("log: {} commit(s), head {}", log.len(), head.short_id()),
            None => "log: empty".to_string(),
        },
        RepositoryManagerEvent::GitFileLogUpdated(f) => {
            format!("file log: {} ({} commit(s))", f.path, f.entries.len())
        }
        RepositoryManagerEvent::LocalBranchesUpdated(b) => format!("local branches: {}", b.len()),
        RepositoryManagerEvent::RemoteBranchesUpdated(b) => format!("remote branches: {}", b.len()),
        RepositoryManagerEvent::GitLocksUpdated(l) => format!("locks: {}", l.len()),
        RepositoryManagerEvent::GitUserUpdated(u) => format!(
            "user: {} <{}>",
            u.name.as_deref().unwrap_or("?"),
            u.email.as_deref().unwrap_or("?")
        ),
        RepositoryManagerEvent::GitAheadBehindUpdated(ab) => {
            format!("ahead {}, behind {}", ab.ahead, ab.behind)
        }
        RepositoryManagerEvent::CurrentBranchUpdated { branch, remote } => format!(
            "current branch: {} on {}",
            branch.as_ref().map(|b| b.name.as_str()).unwrap_or("(detached)"),
            remote.as_ref().map(|r| r.name.as_str()).unwrap_or("(no remote)")
        ),
        RepositoryManagerEvent::BusyChanged(busy) => {
            if *busy {
                "busy".to_string()
            } else {
                "idle".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitkeeper_core::git::{ConfigBranch, GitStatusEntry};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn status_mirrors_porcelain_codes() {
        let root = Path::new("/repo");
        let mut renamed = GitStatusEntry::new(root, "New.cs", GitFileStatus::Renamed, GitFileStatus::None);
        renamed.original_path = Some("Old.cs".into());
        let status = GitStatus {
            local_branch: Some("main".into()),
            remote_branch: Some("origin/main".into()),
            ahead: 1,
            behind: 0,
            entries: vec![
                GitStatusEntry::new(root, "a.txt", GitFileStatus::None, GitFileStatus::Untracked),
                GitStatusEntry::new(root, "b.txt", GitFileStatus::None, GitFileStatus::Modified),
                renamed,
            ],
        };
        assert_eq!(
            status_lines(&status),
            vec![
                "On main tracking origin/main (ahead 1, behind 0)",
                "?? a.txt",
                " M b.txt",
                "R  Old.cs -> New.cs",
            ]
        );
    }

    #[test]
    fn events_render_on_one_line() {
        assert_eq!(event_line(&RepositoryManagerEvent::BusyChanged(true)), "busy");
        assert_eq!(
            event_line(&RepositoryManagerEvent::CurrentBranchUpdated {
                branch: Some(ConfigBranch::unconfigured("feature")),
                remote: None,
            }),
            "current branch: feature on (no remote)"
        );
    }
}
