//! Process-local unit of work keyed by entity type.
//!
//! Mirrors the surface of [`crate::UnitOfWork`] without a database; used in
//! tests and local tooling. Entities are identified by [`Entity::entity_id`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use common::StoreResult;
use domain::Entity;

use crate::lifecycle::Completable;

type EntitySet = Box<dyn Any + Send>;

#[derive(Default)]
pub struct InMemoryUnitOfWork {
    sets: Mutex<HashMap<TypeId, EntitySet>>,
}

impl InMemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_set<E, R>(&self, f: impl FnOnce(&mut Vec<E>) -> R) -> R
    where
        E: Entity + Send + 'static,
    {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        let set = sets
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));

        match set.downcast_mut::<Vec<E>>() {
            Some(entities) => f(entities),
            // keyed by TypeId, cannot hold another type
            None => f(&mut Vec::new()),
        }
    }

    /// Every stored `E` matching `predicate`.
    pub fn query<E, F>(&self, predicate: F) -> Vec<E>
    where
        E: Entity + Clone + Send + 'static,
        F: Fn(&E) -> bool,
    {
        self.with_set(|entities: &mut Vec<E>| {
            entities
                .iter()
                .filter(|entity| predicate(entity))
                .cloned()
                .collect()
        })
    }

    pub fn all<E>(&self) -> Vec<E>
    where
        E: Entity + Clone + Send + 'static,
    {
        self.query(|_: &E| true)
    }

    pub fn count<E>(&self) -> usize
    where
        E: Entity + Send + 'static,
    {
        self.with_set(|entities: &mut Vec<E>| entities.len())
    }

    /// Store `entity`; ignored when its id is already present.
    pub fn add<E>(&self, entity: E)
    where
        E: Entity + Send + 'static,
    {
        self.with_set(|entities: &mut Vec<E>| insert_unique(entities, entity));
    }

    pub fn add_range<E, I>(&self, entities: I)
    where
        E: Entity + Send + 'static,
        I: IntoIterator<Item = E>,
    {
        self.with_set(|stored: &mut Vec<E>| {
            for entity in entities {
                insert_unique(stored, entity);
            }
        });
    }

    /// Remove `entity`. Returns whether it was stored.
    pub fn remove<E>(&self, entity: &E) -> bool
    where
        E: Entity + Send + 'static,
    {
        self.remove_where(|stored: &E| stored.entity_id() == entity.entity_id()) > 0
    }

    pub fn remove_range<E>(&self, entities: &[E])
    where
        E: Entity + Send + 'static,
    {
        let ids: Vec<E::Id> = entities.iter().map(Entity::entity_id).collect();
        self.remove_where(|stored: &E| ids.contains(&stored.entity_id()));
    }

    /// Remove every `E` matching `predicate`. Returns how many were removed.
    pub fn remove_where<E, F>(&self, predicate: F) -> usize
    where
        E: Entity + Send + 'static,
        F: Fn(&E) -> bool,
    {
        self.with_set(|entities: &mut Vec<E>| {
            let before = entities.len();
            entities.retain(|entity| !predicate(entity));
            before - entities.len()
        })
    }

    /// Drop every stored entity of every type.
    pub fn clear(&self) {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn insert_unique<E: Entity>(entities: &mut Vec<E>, entity: E) {
    let id = entity.entity_id();
    if entities.iter().any(|stored| stored.entity_id() == id) {
        return;
    }
    entities.push(entity);
}

#[async_trait]
impl Completable for InMemoryUnitOfWork {
    /// Nothing to flush.
    async fn complete(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::UnitOfWorkScope;
    use crate::repository::entities::person::sample_people;
    use crate::repository::entities::Person;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: u32,
        label: &'static str,
    }

    impl Entity for Tag {
        type Id = u32;

        fn entity_id(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_add_ignores_known_id() {
        let unit = InMemoryUnitOfWork::new();
        let tag = Tag { id: 1, label: "first" };

        unit.add(tag.clone());
        unit.add(Tag { id: 1, label: "second" });

        assert_eq!(unit.all::<Tag>(), vec![tag]);
    }

    #[test]
    fn test_sets_are_separated_by_type() {
        let unit = InMemoryUnitOfWork::new();
        unit.add(Tag { id: 1, label: "a" });
        unit.add_range(sample_people(3));

        assert_eq!(unit.count::<Tag>(), 1);
        assert_eq!(unit.count::<Person>(), 3);
    }

    #[test]
    fn test_query_and_remove_where() {
        let unit = InMemoryUnitOfWork::new();
        unit.add_range((1..=5).map(|id| Tag { id, label: "x" }));

        assert_eq!(unit.query(|tag: &Tag| tag.id % 2 == 0).len(), 2);
        assert_eq!(unit.remove_where(|tag: &Tag| tag.id > 3), 2);
        assert_eq!(unit.count::<Tag>(), 3);
    }

    #[test]
    fn test_remove_and_remove_range() {
        let unit = InMemoryUnitOfWork::new();
        let people = sample_people(3);
        unit.add_range(people.clone());

        assert!(unit.remove(&people[0]));
        assert!(!unit.remove(&people[0]));
        unit.remove_range(&people[1..]);

        assert_eq!(unit.count::<Person>(), 0);
    }

    #[test]
    fn test_clear() {
        let unit = InMemoryUnitOfWork::new();
        unit.add(Tag { id: 7, label: "x" });

        unit.clear();

        assert!(unit.all::<Tag>().is_empty());
    }

    #[test]
    fn test_complete_keeps_contents() {
        let unit = InMemoryUnitOfWork::new();
        unit.add(Tag { id: 3, label: "kept" });

        tokio_test::block_on(unit.complete()).unwrap();

        assert_eq!(unit.count::<Tag>(), 1);
    }

    #[tokio::test]
    async fn test_usable_in_scope() {
        let unit = Arc::new(InMemoryUnitOfWork::new());

        let count = UnitOfWorkScope::run(unit, |unit| async move {
            unit.add(Tag { id: 1, label: "scoped" });
            Ok(unit.count::<Tag>())
        })
        .await
        .unwrap();

        assert_eq!(count, 1);
    }
}
