//! Entity contract.
//!
//! An entity is one persistable record identified by an `EntityId`. The
//! identifier type is generic (uuid, string, integer, ...) but must be
//! comparable, hashable and printable so it can key change tracking and
//! document storage.

use std::fmt::Display;
use std::hash::Hash;

/// A persistable record carrying a unique identifier.
///
/// The identifier must be assigned before the entity is persisted and must
/// not change once committed.
pub trait Entity {
    /// Identifier type
    type Id: Clone + Eq + Hash + Display + Send + Sync + 'static;

    /// The unique identifier of this record.
    fn entity_id(&self) -> Self::Id;

    /// Identifier rendered as a string key.
    fn entity_key(&self) -> String {
        self.entity_id().to_string()
    }
}
