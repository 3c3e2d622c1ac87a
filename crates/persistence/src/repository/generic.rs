//! Generic repository over any sea-orm entity.
//!
//! Reads go through [`Query`]; writes are staged on the context of the
//! underlying [`DataContext`] and committed immediately. `as_no_tracking`
//! only decides whether the records stay attached afterwards.

use std::marker::PhantomData;
use std::slice;

use async_trait::async_trait;
use sea_orm::sea_query::IntoCondition;
use sea_orm::{Condition, EntityTrait};

use common::StoreResult;
use domain::Entity;

use crate::context::tracker::ChangeKind;
use crate::context::{DataContext, DbContext};

use super::query::Query;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Repository trait for dependency injection.
///
/// Covers the eager operations of [`Repository`]; lazy queries stay on the
/// concrete type.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait EntityRepository<M: Send + Sync + 'static>: Send + Sync {
    /// Single record matching `condition`, `None` when nothing matches
    async fn get(&self, condition: Condition, as_no_tracking: bool) -> StoreResult<Option<M>>;

    /// Every record
    async fn get_all(&self, as_no_tracking: bool) -> StoreResult<Vec<M>>;

    /// Every record matching `condition`
    async fn get_all_where(&self, condition: Condition, as_no_tracking: bool)
        -> StoreResult<Vec<M>>;

    /// Insert (or update a tracked record in place)
    async fn add(&self, entity: &M, as_no_tracking: bool) -> StoreResult<()>;

    async fn add_all(&self, entities: &[M], as_no_tracking: bool) -> StoreResult<()>;

    async fn update(&self, entity: &M, as_no_tracking: bool) -> StoreResult<()>;

    async fn update_all(&self, entities: &[M], as_no_tracking: bool) -> StoreResult<()>;

    async fn remove(&self, entity: &M) -> StoreResult<()>;

    async fn remove_all(&self, entities: &[M]) -> StoreResult<()>;

    /// Batched insert into the entity's own table, returns rows written
    async fn bulk_write(&self, entities: &[M], timeout_secs: u64) -> StoreResult<u64>;

    /// Batched insert into `table_name`, returns rows written
    async fn bulk_write_into(
        &self,
        entities: &[M],
        table_name: &str,
        timeout_secs: u64,
    ) -> StoreResult<u64>;
}

/// Repository for entity `E` over a data context `C`.
pub struct Repository<E, C = DbContext> {
    pub(super) source: C,
    _entity: PhantomData<fn() -> E>,
}

impl<E, C> Repository<E, C>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
    C: DataContext,
{
    /// Create a repository over a context or unit of work.
    pub fn new(source: C) -> Self {
        Self {
            source,
            _entity: PhantomData,
        }
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    /// The context writes are staged on.
    pub async fn context(&self) -> StoreResult<DbContext> {
        self.source.context().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Single-or-default lookup.
    pub async fn get<F>(&self, condition: F, as_no_tracking: bool) -> StoreResult<Option<E::Model>>
    where
        F: IntoCondition + Send,
    {
        self.query_where(condition, as_no_tracking).await?.one().await
    }

    pub async fn get_all(&self, as_no_tracking: bool) -> StoreResult<Vec<E::Model>> {
        self.query(as_no_tracking).await?.all().await
    }

    pub async fn get_all_where<F>(
        &self,
        condition: F,
        as_no_tracking: bool,
    ) -> StoreResult<Vec<E::Model>>
    where
        F: IntoCondition + Send,
    {
        self.query_where(condition, as_no_tracking).await?.all().await
    }

    /// Lazy query over every record.
    pub async fn query(&self, as_no_tracking: bool) -> StoreResult<Query<E>> {
        let context = self.source.context().await?;
        Ok(context.set::<E>().tracking(as_no_tracking))
    }

    /// Lazy query over the records matching `condition`.
    pub async fn query_where<F>(&self, condition: F, as_no_tracking: bool) -> StoreResult<Query<E>>
    where
        F: IntoCondition + Send,
    {
        Ok(self.query(as_no_tracking).await?.filter(condition))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn add(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        self.write(slice::from_ref(entity), ChangeKind::Add, as_no_tracking)
            .await
            .map(|_| ())
    }

    pub async fn add_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        self.write(entities, ChangeKind::Add, as_no_tracking)
            .await
            .map(|_| ())
    }

    pub async fn update(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        self.write(slice::from_ref(entity), ChangeKind::Update, as_no_tracking)
            .await
            .map(|_| ())
    }

    pub async fn update_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        self.write(entities, ChangeKind::Update, as_no_tracking)
            .await
            .map(|_| ())
    }

    pub async fn remove(&self, entity: &E::Model) -> StoreResult<()> {
        self.write(slice::from_ref(entity), ChangeKind::Remove, false)
            .await
            .map(|_| ())
    }

    pub async fn remove_all(&self, entities: &[E::Model]) -> StoreResult<()> {
        self.write(entities, ChangeKind::Remove, false)
            .await
            .map(|_| ())
    }

    /// Stage `entities`, commit, then detach them when asked to.
    ///
    /// Two entities with the same id in one call are rejected before
    /// anything is staged. A failed commit detaches what this call staged.
    async fn write(
        &self,
        entities: &[E::Model],
        kind: ChangeKind,
        as_no_tracking: bool,
    ) -> StoreResult<u64> {
        let context = self.source.context().await?;
        let keys = context.stage_all::<E>(entities, kind)?;

        match self.source.commit().await {
            Ok(rows) => {
                if as_no_tracking {
                    context.detach_keys(&keys);
                }
                tracing::debug!(?kind, entities = entities.len(), rows, "Repository write committed");
                Ok(rows)
            }
            Err(e) => {
                context.detach_keys(&keys);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<E, C> EntityRepository<E::Model> for Repository<E, C>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync + 'static,
    C: DataContext,
{
    async fn get(&self, condition: Condition, as_no_tracking: bool) -> StoreResult<Option<E::Model>> {
        Repository::get(self, condition, as_no_tracking).await
    }

    async fn get_all(&self, as_no_tracking: bool) -> StoreResult<Vec<E::Model>> {
        Repository::get_all(self, as_no_tracking).await
    }

    async fn get_all_where(
        &self,
        condition: Condition,
        as_no_tracking: bool,
    ) -> StoreResult<Vec<E::Model>> {
        Repository::get_all_where(self, condition, as_no_tracking).await
    }

    async fn add(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        Repository::add(self, entity, as_no_tracking).await
    }

    async fn add_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        Repository::add_all(self, entities, as_no_tracking).await
    }

    async fn update(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        Repository::update(self, entity, as_no_tracking).await
    }

    async fn update_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        Repository::update_all(self, entities, as_no_tracking).await
    }

    async fn remove(&self, entity: &E::Model) -> StoreResult<()> {
        Repository::remove(self, entity).await
    }

    async fn remove_all(&self, entities: &[E::Model]) -> StoreResult<()> {
        Repository::remove_all(self, entities).await
    }

    async fn bulk_write(&self, entities: &[E::Model], timeout_secs: u64) -> StoreResult<u64> {
        Repository::bulk_write(self, entities, timeout_secs).await
    }

    async fn bulk_write_into(
        &self,
        entities: &[E::Model],
        table_name: &str,
        timeout_secs: u64,
    ) -> StoreResult<u64> {
        Repository::bulk_write_into(self, entities, table_name, timeout_secs).await
    }
}
