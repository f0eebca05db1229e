mod client;
mod locks;
mod log;
mod status;

pub use client::{parse_ahead_behind, parse_user, ProcessGitClient};
pub use locks::LocksOutputProcessor;
pub use log::{LogEntryParser, LOG_FORMAT};
pub use status::StatusOutputProcessor;
