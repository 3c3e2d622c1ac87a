//! Repository layer for data access.

mod blocking;
pub mod bulk;
pub mod entities;
mod generic;
pub mod query;

pub use blocking::{BlockingQuery, BlockingRepository};
pub use bulk::{batch_count, column_mapping, ColumnMapping};
pub use generic::{EntityRepository, Repository};
pub use query::Query;

#[cfg(any(test, feature = "test-utils"))]
pub use generic::MockEntityRepository;
