//! Command implementations, one module per subcommand.

pub mod list;
pub mod migrate;
pub mod seed;
