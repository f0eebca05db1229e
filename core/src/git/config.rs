//! Snapshot of the branch and remote configuration of a repository.
//!
//! Values come from libgit2, so includes, conditional includes and the
//! global/system levels resolve the way `git config` resolves them.

use std::collections::{BTreeMap, BTreeSet};

use git2::{BranchType, Config, ErrorCode, Repository};

use super::types::{ConfigBranch, ConfigRemote};
use crate::error::GitConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitConfig {
    /// Branches with a `remote` or `merge` entry, keyed by short name.
    pub branches: BTreeMap<String, ConfigBranch>,
    /// In the order libgit2 lists them.
    pub remotes: Vec<ConfigRemote>,
}

impl GitConfig {
    pub fn read(repo: &Repository) -> Result<Self, GitConfigError> {
        let config = repo.config()?.snapshot()?;

        let mut names = BTreeSet::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.insert(name.to_string());
            }
        }
        // An unborn HEAD branch has no ref yet but may already be configured.
        if let Some(name) = unborn_head_branch(repo) {
            names.insert(name);
        }

        let mut branches = BTreeMap::new();
        for name in names {
            let remote = optional(&config, &format!("branch.{name}.remote"))?;
            let merge = optional(&config, &format!("branch.{name}.merge"))?;
            if remote.is_some() || merge.is_some() {
                branches.insert(name.clone(), ConfigBranch { name, remote, merge });
            }
        }

        let mut remotes = Vec::new();
        for name in repo.remotes()?.iter().flatten() {
            let remote = repo.find_remote(name)?;
            remotes.push(ConfigRemote {
                name: name.to_string(),
                url: remote.url().map(str::to_string),
                push_url: remote.pushurl().map(str::to_string),
            });
        }

        Ok(Self { branches, remotes })
    }

    pub fn branch(&self, name: &str) -> Option<ConfigBranch> {
        self.branches.get(name).cloned()
    }

    pub fn remote(&self, name: &str) -> Option<&ConfigRemote> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

fn optional(config: &Config, key: &str) -> Result<Option<String>, git2::Error> {
    match config.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn unborn_head_branch(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    head.symbolic_target()?
        .strip_prefix("refs/heads/")
        .map(str::to_string)
}
