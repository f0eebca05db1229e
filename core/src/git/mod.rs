mod client;
pub mod config;
pub mod installation;
mod types;

pub use client::GitClient;
pub use config::GitConfig;
pub use installation::{GitInstallationState, MINIMUM_GIT_LFS_VERSION, MINIMUM_GIT_VERSION};
pub use types::{
    BranchesData, ConfigBranch, ConfigRemote, GitAheadBehindStatus, GitBranch, GitFileLog,
    GitFileStatus, GitLock, GitLogEntry, GitStatus, GitStatusEntry, GitUser, GitVersion,
    HeadState, RepositoryInfo,
};
