//! Lazy, composable query handle.
//!
//! Nothing is executed until one of the terminal methods (`all`, `one`,
//! `first`, `count`) is awaited. Tracked queries attach their results to the
//! context they were created from.

use sea_orm::sea_query::IntoCondition;
use sea_orm::{EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select};

use common::{StoreError, StoreResult};
use domain::Entity;

use crate::context::DbContext;

/// Query over entity `E`.
pub struct Query<E: EntityTrait> {
    context: DbContext,
    select: Select<E>,
    as_no_tracking: bool,
}

impl<E> Query<E>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
{
    pub(crate) fn new(context: DbContext, select: Select<E>) -> Self {
        Self {
            context,
            select,
            as_no_tracking: false,
        }
    }

    /// Do not attach the results to the context.
    pub fn as_no_tracking(mut self) -> Self {
        self.as_no_tracking = true;
        self
    }

    pub(crate) fn tracking(mut self, as_no_tracking: bool) -> Self {
        self.as_no_tracking = as_no_tracking;
        self
    }

    pub fn is_tracking(&self) -> bool {
        !self.as_no_tracking
    }

    pub fn filter<F: IntoCondition>(mut self, condition: F) -> Self {
        self.select = self.select.filter(condition);
        self
    }

    pub fn order_by_asc(mut self, column: E::Column) -> Self {
        self.select = self.select.order_by_asc(column);
        self
    }

    pub fn order_by_desc(mut self, column: E::Column) -> Self {
        self.select = self.select.order_by_desc(column);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.select = self.select.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.select = self.select.offset(offset);
        self
    }

    /// Execute and materialize every matching record.
    pub async fn all(self) -> StoreResult<Vec<E::Model>> {
        let models = self.select.all(self.context.connection()).await?;
        Ok(resolve::<E>(&self.context, self.as_no_tracking, models))
    }

    /// Single-or-default: `None` when nothing matches, an error when more
    /// than one record does.
    pub async fn one(self) -> StoreResult<Option<E::Model>> {
        let mut models = self
            .select
            .limit(2)
            .all(self.context.connection())
            .await?;

        if models.len() > 1 {
            return Err(StoreError::multiple_matches(E::default().table_name()));
        }

        Ok(models
            .pop()
            .map(|model| resolve_one::<E>(&self.context, self.as_no_tracking, model)))
    }

    /// The first matching record, if any.
    pub async fn first(self) -> StoreResult<Option<E::Model>> {
        let model = self.select.one(self.context.connection()).await?;
        Ok(model.map(|model| resolve_one::<E>(&self.context, self.as_no_tracking, model)))
    }

    pub async fn count(self) -> StoreResult<u64> {
        Ok(self.select.count(self.context.connection()).await?)
    }

    /// The underlying sea-orm select, for anything not covered here.
    pub fn into_select(self) -> Select<E> {
        self.select
    }
}

fn resolve_one<E>(context: &DbContext, as_no_tracking: bool, model: E::Model) -> E::Model
where
    E: EntityTrait,
    E::Model: Entity + Clone + Send + Sync,
{
    if as_no_tracking {
        model
    } else {
        context.attach::<E>(model)
    }
}

fn resolve<E>(context: &DbContext, as_no_tracking: bool, models: Vec<E::Model>) -> Vec<E::Model>
where
    E: EntityTrait,
    E::Model: Entity + Clone + Send + Sync,
{
    models
        .into_iter()
        .map(|model| resolve_one::<E>(context, as_no_tracking, model))
        .collect()
}
