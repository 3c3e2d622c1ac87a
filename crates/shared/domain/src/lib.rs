//! Domain layer - entity contract and shared constants.
//!
//! This crate has no infrastructure dependencies. Every persistable record,
//! relational or document, implements [`Entity`].

pub mod constants;
pub mod entity;

pub use constants::*;
pub use entity::Entity;
