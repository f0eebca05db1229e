#[allow(clippy::module_inception)]
pub mod error;
pub mod task;

pub use error::{CliError, GitConfigError, ParseError, SettingsError, WatcherError};
pub use task::TaskError;
