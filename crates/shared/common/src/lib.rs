//! Common utilities shared across the persistence crates.
//!
//! This crate provides:
//! - Unified error handling for repositories and units of work
//! - Configuration loaded from the environment

pub mod config;
pub mod error;

pub use config::*;
pub use error::{StoreError, StoreResult};
