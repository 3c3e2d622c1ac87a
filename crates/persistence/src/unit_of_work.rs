//! Unit of Work over a relational database.
//!
//! The context is created on first use and cached; creation is serialized by
//! an async mutex, the operations themselves are not. Every operation commits
//! immediately. A failed commit replaces the context so the next operation
//! starts from a clean change tracker.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sea_orm::sea_query::IntoCondition;
use sea_orm::{EntityTrait, PaginatorTrait, QueryFilter};
use tokio::sync::Mutex;

use common::{DatabaseConfig, StoreError, StoreResult};
use domain::Entity;

use crate::context::tracker::{primary_key_condition, ChangeKind};
use crate::context::{DataContext, DbContext};
use crate::lifecycle::Completable;
use crate::repository::Query;

/// Lazily connected unit of work.
pub struct UnitOfWork {
    config: DatabaseConfig,
    context: Mutex<Option<DbContext>>,
    contexts_opened: AtomicUsize,
}

impl UnitOfWork {
    /// Create a unit of work for `connection_string`. Nothing is opened yet.
    pub fn new(connection_string: impl Into<String>) -> StoreResult<Self> {
        Ok(Self::from_config(DatabaseConfig::new(connection_string)?))
    }

    pub fn from_config(config: DatabaseConfig) -> Self {
        Self {
            config,
            context: Mutex::new(None),
            contexts_opened: AtomicUsize::new(0),
        }
    }

    /// How many contexts this unit has created so far.
    pub fn contexts_opened(&self) -> usize {
        self.contexts_opened.load(Ordering::SeqCst)
    }

    pub async fn is_open(&self) -> bool {
        self.context.lock().await.is_some()
    }

    /// The current context, created on first access.
    async fn current(&self) -> StoreResult<DbContext> {
        let mut guard = self.context.lock().await;
        if let Some(context) = guard.as_ref() {
            return Ok(context.clone());
        }

        let context = self.open().await?;
        *guard = Some(context.clone());
        Ok(context)
    }

    async fn open(&self) -> StoreResult<DbContext> {
        let context = DbContext::connect(&self.config).await?;
        let opened = self.contexts_opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(opened, "Unit of work context opened");
        Ok(context)
    }

    /// Commit `context`; on failure swap in a fresh context and return the
    /// commit error.
    async fn save(&self, context: &DbContext) -> StoreResult<u64> {
        let commit = match context.save_changes().await {
            Ok(rows) => return Ok(rows),
            Err(e) => e,
        };

        tracing::warn!(error = %commit, "Commit failed, recreating context");
        let mut guard = self.context.lock().await;
        match self.open().await {
            Ok(fresh) => {
                *guard = Some(fresh);
                Err(commit)
            }
            Err(recovery) => {
                tracing::error!(error = %recovery, "Recreating context failed");
                *guard = None;
                Err(StoreError::RecoveryFailed {
                    commit: Box::new(commit),
                    recovery: Box::new(recovery),
                })
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Tracked query over every `E`.
    pub async fn query<E>(&self) -> StoreResult<Query<E>>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        Ok(self.current().await?.set::<E>())
    }

    /// Insert `entity`, or update the stored record with the same id.
    pub async fn add<E>(&self, entity: &E::Model) -> StoreResult<()>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        let context = self.current().await?;

        let exists = context.is_tracked::<E>(entity)
            || E::find()
                .filter(primary_key_condition::<E>(entity))
                .count(context.connection())
                .await?
                > 0;
        let kind = if exists {
            ChangeKind::Update
        } else {
            ChangeKind::Add
        };

        context.stage::<E>(entity, kind);
        self.save(&context).await.map(|_| ())
    }

    pub async fn add_range<E>(&self, entities: &[E::Model]) -> StoreResult<()>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        self.stage_all::<E>(entities, ChangeKind::Add).await
    }

    pub async fn remove<E>(&self, entity: &E::Model) -> StoreResult<()>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        self.stage_all::<E>(std::slice::from_ref(entity), ChangeKind::Remove)
            .await
    }

    pub async fn remove_range<E>(&self, entities: &[E::Model]) -> StoreResult<()>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        self.stage_all::<E>(entities, ChangeKind::Remove).await
    }

    /// Remove every `E` matching `condition`. Returns how many were removed.
    pub async fn remove_where<E, F>(&self, condition: F) -> StoreResult<usize>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
        F: IntoCondition + Send,
    {
        let context = self.current().await?;
        let matches = context.set::<E>().filter(condition).all().await?;

        for entity in &matches {
            context.stage::<E>(entity, ChangeKind::Remove);
        }
        self.save(&context).await?;

        Ok(matches.len())
    }

    async fn stage_all<E>(&self, entities: &[E::Model], kind: ChangeKind) -> StoreResult<()>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        let context = self.current().await?;
        context.stage_all::<E>(entities, kind)?;
        self.save(&context).await.map(|_| ())
    }

    /// Commit outstanding changes and release the context.
    ///
    /// A never-opened unit completes without connecting. The next operation
    /// opens a new context.
    pub async fn complete(&self) -> StoreResult<()> {
        let Some(context) = self.context.lock().await.take() else {
            return Ok(());
        };

        let rows = context.save_changes().await?;
        tracing::info!(rows, "Unit of work context released");
        Ok(())
    }
}

#[async_trait]
impl DataContext for UnitOfWork {
    async fn context(&self) -> StoreResult<DbContext> {
        self.current().await
    }

    async fn commit(&self) -> StoreResult<u64> {
        let context = self.current().await?;
        self.save(&context).await
    }
}

#[async_trait]
impl Completable for UnitOfWork {
    async fn complete(&self) -> StoreResult<()> {
        UnitOfWork::complete(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_connection_string_rejected() {
        let result = UnitOfWork::new("");
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_construction_does_not_connect() {
        let unit = UnitOfWork::new("postgres://nobody@127.0.0.1:1/none").unwrap();

        assert_eq!(unit.contexts_opened(), 0);
        assert!(!unit.is_open().await);
    }

    #[tokio::test]
    async fn test_complete_without_context_is_noop() {
        let unit = UnitOfWork::new("postgres://nobody@127.0.0.1:1/none").unwrap();

        unit.complete().await.unwrap();
        assert_eq!(unit.contexts_opened(), 0);
    }
}
