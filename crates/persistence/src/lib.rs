//! Persistence Library
//!
//! Generic data access over sea-orm: a change-tracking context, a lazily
//! connected unit of work, a scope guard that completes it, a generic
//! repository with a bulk writer, plus an in-memory unit of work and a
//! Redis-backed document store.

pub mod context;
pub mod document;
pub mod infra;
pub mod lifecycle;
pub mod memory;
pub mod repository;
pub mod unit_of_work;

pub use context::tracker::EntityState;
pub use context::{DataContext, DbContext};
pub use document::{Document, DocumentRepository, DocumentUnitOfWork};
pub use infra::{Database, Migrator};
pub use lifecycle::{Completable, UnitOfWorkScope};
pub use memory::InMemoryUnitOfWork;
pub use repository::{BlockingQuery, BlockingRepository, EntityRepository, Query, Repository};
pub use unit_of_work::UnitOfWork;

#[cfg(any(test, feature = "test-utils"))]
pub use lifecycle::MockCompletable;
#[cfg(any(test, feature = "test-utils"))]
pub use repository::MockEntityRepository;
