//! Infrastructure layer - connection management and schema migrations.

mod db;
pub mod migrations;

pub use db::{connect_options, Database};
pub use migrations::Migrator;
