//! gitkeeper command line: argument parsing, session wiring and rendering.

pub mod commands;
pub mod progress;
pub mod render;
pub mod session;
