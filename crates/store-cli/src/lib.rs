//! x3-store library: argument parsing and command implementations behind
//! the `x3-store` binary.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
