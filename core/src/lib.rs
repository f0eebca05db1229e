pub mod cache;
pub mod config;
pub mod error;
pub mod git;
pub mod process;
pub mod repository;
pub mod settings;
pub mod task;
pub mod util;

pub use error::TaskError;
pub use repository::{Repository, RepositoryManager, RepositoryManagerEvent};
pub use task::{Task, TaskAffinity, TaskHandle, TaskOutcome, TaskScheduler};
