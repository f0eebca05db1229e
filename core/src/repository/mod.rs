//! Repository layout, change watching and the manager that keeps the caches
//! in step with the repository.

mod facade;
mod manager;
pub mod paths;
pub mod refs;
mod watcher;

pub use facade::Repository;
pub use manager::{
    caches_invalidated_by, get_current_branch_and_remote, read_repository_info,
    RepositoryManager, RepositoryManagerEvent,
};
pub use paths::RepositoryPathConfiguration;
pub use watcher::{ChangeFeed, RepositoryWatcher, RepositoryWatcherEvent, WatcherState};
