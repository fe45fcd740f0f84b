//! I/O helpers for the execution core.

pub mod config;
pub mod interrupt;
pub mod model;
pub mod process;
pub mod prompt;
pub mod render;
pub mod test_cmd;
