//! SeaORM entity definitions

pub mod person;

// Re-exports for public API convenience
pub use person::{Entity as PersonEntity, Model as Person};
