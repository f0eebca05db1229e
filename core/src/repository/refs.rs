//! HEAD and branch reads through libgit2.

use git2::{BranchType, ErrorCode, Repository};

use super::paths::RepositoryPathConfiguration;
use crate::error::GitConfigError;
use crate::git::{BranchesData, GitBranch, GitConfig, HeadState};

pub fn open(paths: &RepositoryPathConfiguration) -> Result<Repository, GitConfigError> {
    Repository::open(&paths.repository_path).map_err(|source| GitConfigError::NotARepository {
        path: paths.repository_path.clone(),
        source,
    })
}

pub fn read_head(repo: &Repository) -> Result<HeadState, GitConfigError> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head
            .shorthand()
            .map(|name| HeadState::Branch(name.to_string()))
            .unwrap_or_default()),
        Ok(head) => Ok(head
            .target()
            .map(|id| HeadState::Detached(id.to_string()))
            .unwrap_or_default()),
        // Fresh repository: HEAD names a branch with no commits yet.
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .map(|name| HeadState::Branch(name.to_string()))
                .unwrap_or_default())
        }
        Err(e) if e.code() == ErrorCode::NotFound => Ok(HeadState::Unknown),
        Err(e) => Err(e.into()),
    }
}

/// Commit HEAD points at, `None` while the branch is unborn.
pub fn resolve_head(repo: &Repository) -> Option<String> {
    repo.head().ok()?.target().map(|id| id.to_string())
}

fn branch_names(repo: &Repository, kind: BranchType) -> Result<Vec<String>, GitConfigError> {
    let mut names = Vec::new();
    for branch in repo.branches(Some(kind))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// `<remote>/<branch>` names, without the symbolic `<remote>/HEAD`.
pub fn remote_branch_names(repo: &Repository) -> Result<Vec<String>, GitConfigError> {
    let mut names = branch_names(repo, BranchType::Remote)?;
    names.retain(|n| !n.ends_with("/HEAD"));
    Ok(names)
}

pub fn read_branches(repo: &Repository, config: GitConfig) -> Result<BranchesData, GitConfigError> {
    let head = read_head(repo)?;

    let local = branch_names(repo, BranchType::Local)?
        .into_iter()
        .map(|name| GitBranch {
            tracking: config.branches.get(&name).and_then(|b| b.tracking_ref()),
            is_active: head.branch_name() == Some(name.as_str()),
            name,
        })
        .collect();
    let remote = remote_branch_names(repo)?
        .into_iter()
        .map(|name| GitBranch {
            name,
            tracking: None,
            is_active: false,
        })
        .collect();

    Ok(BranchesData {
        local,
        remote,
        config_branches: config.branches,
        config_remotes: config.remotes,
    })
}
