pub mod factory;
pub mod file_settings;
pub mod git;
pub mod installation;
