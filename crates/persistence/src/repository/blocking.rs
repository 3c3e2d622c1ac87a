//! Blocking façade over [`Repository`].
//!
//! Owns a current-thread runtime and drives every async operation to
//! completion on it. The connection pool is created on that runtime too, so
//! the façade must be used from outside any other tokio runtime.
//! [`BlockingQuery`] composes like [`Query`] and runs its terminals on the
//! same runtime.

use sea_orm::sea_query::IntoCondition;
use sea_orm::EntityTrait;
use tokio::runtime::{Builder, Runtime};

use common::{DatabaseConfig, StoreError, StoreResult};
use domain::Entity;

use crate::context::{DataContext, DbContext};
use crate::infra::Database;

use super::generic::Repository;
use super::query::Query;

/// Synchronous repository for entity `E`.
pub struct BlockingRepository<E, C = DbContext> {
    runtime: Runtime,
    inner: Repository<E, C>,
}

fn runtime() -> StoreResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| StoreError::internal(format!("Failed to create runtime: {}", e)))
}

/// Synchronous handle over a [`Query`], bound to its façade's runtime.
pub struct BlockingQuery<'a, E: EntityTrait> {
    runtime: &'a Runtime,
    query: Query<E>,
}

impl<E> BlockingQuery<'_, E>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
{
    pub fn as_no_tracking(mut self) -> Self {
        self.query = self.query.as_no_tracking();
        self
    }

    pub fn is_tracking(&self) -> bool {
        self.query.is_tracking()
    }

    pub fn filter<F: IntoCondition>(mut self, condition: F) -> Self {
        self.query = self.query.filter(condition);
        self
    }

    pub fn order_by_asc(mut self, column: E::Column) -> Self {
        self.query = self.query.order_by_asc(column);
        self
    }

    pub fn order_by_desc(mut self, column: E::Column) -> Self {
        self.query = self.query.order_by_desc(column);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    pub fn all(self) -> StoreResult<Vec<E::Model>> {
        self.runtime.block_on(self.query.all())
    }

    /// The single match, or an error when more than one record matches.
    pub fn one(self) -> StoreResult<Option<E::Model>> {
        self.runtime.block_on(self.query.one())
    }

    pub fn first(self) -> StoreResult<Option<E::Model>> {
        self.runtime.block_on(self.query.first())
    }

    pub fn count(self) -> StoreResult<u64> {
        self.runtime.block_on(self.query.count())
    }
}

impl<E> BlockingRepository<E, DbContext>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
{
    /// Connect to `url` and run pending migrations.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let config = DatabaseConfig::new(url)?;
        let runtime = runtime()?;
        let database = runtime.block_on(Database::connect(&config))?;

        Ok(Self {
            runtime,
            inner: Repository::new(DbContext::new(database.get_connection())),
        })
    }
}

impl<E, C> BlockingRepository<E, C>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
    C: DataContext,
{
    /// Wrap an existing source. Its connections must not be bound to
    /// another runtime.
    pub fn from_source(source: C) -> StoreResult<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: Repository::new(source),
        })
    }

    /// The wrapped async repository.
    pub fn inner(&self) -> &Repository<E, C> {
        &self.inner
    }

    /// Drive any future on the façade's runtime.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn context(&self) -> StoreResult<DbContext> {
        self.block_on(self.inner.context())
    }

    pub fn get<F>(&self, condition: F, as_no_tracking: bool) -> StoreResult<Option<E::Model>>
    where
        F: IntoCondition + Send,
    {
        self.block_on(self.inner.get(condition, as_no_tracking))
    }

    pub fn get_all(&self, as_no_tracking: bool) -> StoreResult<Vec<E::Model>> {
        self.block_on(self.inner.get_all(as_no_tracking))
    }

    pub fn get_all_where<F>(&self, condition: F, as_no_tracking: bool) -> StoreResult<Vec<E::Model>>
    where
        F: IntoCondition + Send,
    {
        self.block_on(self.inner.get_all_where(condition, as_no_tracking))
    }

    /// Composable query over every record.
    pub fn query(&self, as_no_tracking: bool) -> StoreResult<BlockingQuery<'_, E>> {
        let query = self.block_on(self.inner.query(as_no_tracking))?;
        Ok(BlockingQuery {
            runtime: &self.runtime,
            query,
        })
    }

    /// Composable query over the records matching `condition`.
    pub fn query_where<F>(
        &self,
        condition: F,
        as_no_tracking: bool,
    ) -> StoreResult<BlockingQuery<'_, E>>
    where
        F: IntoCondition + Send,
    {
        let query = self.block_on(self.inner.query_where(condition, as_no_tracking))?;
        Ok(BlockingQuery {
            runtime: &self.runtime,
            query,
        })
    }

    /// Count the records matching `condition`.
    pub fn count_where<F>(&self, condition: F) -> StoreResult<u64>
    where
        F: IntoCondition + Send,
    {
        self.block_on(async {
            self.inner
                .query_where(condition, true)
                .await?
                .count()
                .await
        })
    }

    pub fn add(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        self.block_on(self.inner.add(entity, as_no_tracking))
    }

    pub fn add_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        self.block_on(self.inner.add_all(entities, as_no_tracking))
    }

    pub fn update(&self, entity: &E::Model, as_no_tracking: bool) -> StoreResult<()> {
        self.block_on(self.inner.update(entity, as_no_tracking))
    }

    pub fn update_all(&self, entities: &[E::Model], as_no_tracking: bool) -> StoreResult<()> {
        self.block_on(self.inner.update_all(entities, as_no_tracking))
    }

    pub fn remove(&self, entity: &E::Model) -> StoreResult<()> {
        self.block_on(self.inner.remove(entity))
    }

    pub fn remove_all(&self, entities: &[E::Model]) -> StoreResult<()> {
        self.block_on(self.inner.remove_all(entities))
    }

    pub fn bulk_write(&self, entities: &[E::Model], timeout_secs: u64) -> StoreResult<u64> {
        self.block_on(self.inner.bulk_write(entities, timeout_secs))
    }

    pub fn bulk_write_into(
        &self,
        entities: &[E::Model],
        table_name: &str,
        timeout_secs: u64,
    ) -> StoreResult<u64> {
        self.block_on(self.inner.bulk_write_into(entities, table_name, timeout_secs))
    }
}
