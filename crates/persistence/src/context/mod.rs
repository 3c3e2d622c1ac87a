//! Database context - a connection plus the set of tracked entities.
//!
//! Repositories and units of work stage changes here; nothing reaches the
//! database before [`DbContext::save_changes`], which flushes every pending
//! change inside one transaction.

pub mod tracker;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait,
    TransactionTrait,
};

use common::{DatabaseConfig, StoreResult};
use domain::Entity;

use crate::infra::Database;
use crate::repository::query::Query;
use tracker::{
    ensure_distinct, ChangeKind, ChangeTracker, EntityState, PendingChange, TrackKey,
    TrackedRecord,
};

/// Anything that can hand out a context and commit it.
///
/// Implemented by [`DbContext`] itself and by [`crate::UnitOfWork`], so a
/// repository can work on either.
#[async_trait]
pub trait DataContext: Send + Sync {
    /// The context changes are staged on
    async fn context(&self) -> StoreResult<DbContext>;

    /// Persist every pending change, returning the affected row count
    async fn commit(&self) -> StoreResult<u64>;
}

/// Connection and change tracker.
///
/// Clones share the same connection and the same tracker.
#[derive(Clone)]
pub struct DbContext {
    connection: Arc<DatabaseConnection>,
    tracker: Arc<Mutex<ChangeTracker>>,
}

impl DbContext {
    /// Create a context with an empty tracker over a connection, owned or
    /// shared with other contexts.
    pub fn new(connection: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self {
            connection: connection.into(),
            tracker: Arc::new(Mutex::new(ChangeTracker::default())),
        }
    }

    /// Connect using the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let database = Database::open(config).await?;
        Ok(Self::new(database.get_connection()))
    }

    /// Get a reference to the database connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Shared handle to the connection, e.g. for an independent context.
    pub fn shared_connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.connection)
    }

    pub fn backend(&self) -> DbBackend {
        self.connection.get_database_backend()
    }

    /// Query over all records of `E`, tracked by default.
    pub fn set<E>(&self) -> Query<E>
    where
        E: EntityTrait + 'static,
        E::Model: Entity + Clone + Send + Sync,
    {
        Query::new(self.clone(), E::find())
    }

    fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Staging
    // =========================================================================

    pub(crate) fn stage<E>(&self, model: &E::Model, kind: ChangeKind) -> TrackKey
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        self.tracker().stage::<E>(model.clone(), kind)
    }

    /// Stage the same change for every model.
    ///
    /// Nothing is staged when two models share an identifier.
    pub(crate) fn stage_all<E>(
        &self,
        models: &[E::Model],
        kind: ChangeKind,
    ) -> StoreResult<Vec<TrackKey>>
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        ensure_distinct::<E>(models)?;

        let mut tracker = self.tracker();
        Ok(models
            .iter()
            .map(|model| tracker.stage::<E>(model.clone(), kind))
            .collect())
    }

    /// Queue inserts into `table` that never enter the tracked-entity set.
    ///
    /// Returns the sequence numbers to hand to [`Self::forget_detached`].
    pub(crate) fn stage_detached<E>(&self, models: &[E::Model], table: &str) -> Vec<u64>
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        let mut tracker = self.tracker();
        models
            .iter()
            .map(|model| tracker.stage_detached::<E>(model.clone(), table))
            .collect()
    }

    /// Drop queued detached inserts that are still pending.
    pub(crate) fn forget_detached(&self, sequences: &[u64]) {
        self.tracker().forget_detached(sequences);
    }

    /// Track a record read from the store, resolving it against the
    /// already tracked instance of the same identity.
    pub fn attach<E>(&self, model: E::Model) -> E::Model
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        self.tracker().attach::<E>(model)
    }

    /// Stop tracking `model`. Returns whether it was tracked.
    pub fn detach<E>(&self, model: &E::Model) -> bool
    where
        E: EntityTrait,
        E::Model: Entity,
    {
        self.tracker().detach(&TrackKey::of::<E>(model))
    }

    pub(crate) fn detach_keys(&self, keys: &[TrackKey]) {
        let mut tracker = self.tracker();
        for key in keys {
            tracker.detach(key);
        }
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub fn is_tracked<E>(&self, model: &E::Model) -> bool
    where
        E: EntityTrait,
        E::Model: Entity,
    {
        self.entity_state::<E>(model).is_some()
    }

    /// Tracking state of `model`, `None` when untracked.
    pub fn entity_state<E>(&self, model: &E::Model) -> Option<EntityState>
    where
        E: EntityTrait,
        E::Model: Entity,
    {
        self.tracker().state(&TrackKey::of::<E>(model))
    }

    /// Tracking state of the `E` with the given identifier.
    pub fn entity_state_by_id<E>(&self, id: impl ToString) -> Option<EntityState>
    where
        E: EntityTrait,
    {
        self.tracker().state(&TrackKey::for_id::<E>(id))
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker().len()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker().has_changes()
    }

    /// Drop every pending change. Returns how many were dropped.
    pub fn discard_changes(&self) -> usize {
        self.tracker().discard()
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Flush all pending changes in one transaction.
    ///
    /// Returns the number of affected rows. With nothing pending the
    /// database is not contacted. On failure the transaction is rolled back
    /// and the pending changes stay staged.
    pub async fn save_changes(&self) -> StoreResult<u64> {
        let pending = self.tracker().pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let backend = self.backend();
        let txn = self.connection.begin().await?;

        match flush(&txn, &pending, backend).await {
            Ok(rows) => {
                txn.commit().await?;
                self.tracker().accept(&pending);
                tracing::debug!(changes = pending.len(), rows, "Changes saved");
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::error!("Transaction rollback failed: {}", rollback_err);
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl DataContext for DbContext {
    async fn context(&self) -> StoreResult<DbContext> {
        Ok(self.clone())
    }

    async fn commit(&self) -> StoreResult<u64> {
        self.save_changes().await
    }
}

#[async_trait]
impl<T: DataContext + ?Sized> DataContext for Arc<T> {
    async fn context(&self) -> StoreResult<DbContext> {
        (**self).context().await
    }

    async fn commit(&self) -> StoreResult<u64> {
        (**self).commit().await
    }
}

/// Execute the pending changes in staging order.
///
/// Consecutive inserts of the same type into the same table share one
/// multi-row statement.
async fn flush(
    txn: &DatabaseTransaction,
    pending: &[PendingChange],
    backend: DbBackend,
) -> Result<u64, DbErr> {
    let mut rows = 0;
    let mut index = 0;

    while index < pending.len() {
        let change = &pending[index];

        match change.state {
            EntityState::Added => {
                let table = change.table();
                let end = pending[index..]
                    .iter()
                    .position(|next| {
                        next.state != EntityState::Added
                            || next.key.entity_type() != change.key.entity_type()
                            || next.table() != table
                    })
                    .map_or(pending.len(), |offset| index + offset);

                let batch: Vec<Arc<dyn TrackedRecord>> = pending[index..end]
                    .iter()
                    .map(|next| Arc::clone(&next.record))
                    .collect();

                for statement in change.record.insert_statements(&batch, &table, backend)? {
                    rows += txn.execute(statement).await?.rows_affected();
                }
                index = end;
            }
            EntityState::Modified => {
                // nothing besides the key to write
                if let Some(statement) = change.record.update_statement(backend) {
                    let result = txn.execute(statement).await?;
                    if result.rows_affected() == 0 {
                        return Err(DbErr::RecordNotUpdated);
                    }
                    rows += result.rows_affected();
                }
                index += 1;
            }
            EntityState::Deleted => {
                let result = txn.execute(change.record.delete_statement(backend)).await?;
                if result.rows_affected() == 0 {
                    return Err(DbErr::RecordNotFound(change.record.describe()));
                }
                rows += result.rows_affected();
                index += 1;
            }
            EntityState::Unchanged => index += 1,
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::entities::person::{self, sample_people};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Transaction};

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    /// Statements the mock received. `context` must hold the last handle.
    fn transaction_log(context: DbContext) -> Vec<Transaction> {
        let connection = context.shared_connection();
        drop(context);
        match Arc::try_unwrap(connection) {
            Ok(connection) => connection.into_transaction_log(),
            Err(_) => panic!("connection is still shared"),
        }
    }

    #[tokio::test]
    async fn test_save_without_changes_does_not_touch_database() {
        let context = DbContext::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        assert_eq!(context.save_changes().await.unwrap(), 0);

        let log = transaction_log(context);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_inserts_share_one_statement() {
        let connection = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(3)])
            .into_connection();
        let context = DbContext::new(connection);

        for person in sample_people(3) {
            context.stage::<person::Entity>(&person, ChangeKind::Add);
        }

        assert_eq!(context.save_changes().await.unwrap(), 3);
        assert!(!context.has_changes());
        assert_eq!(context.tracked_count(), 3);

        let log = transaction_log(context);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_row_on_update_fails_and_keeps_changes() {
        let connection = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .into_connection();
        let context = DbContext::new(connection);
        let person = sample_people(1).remove(0);

        context.stage::<person::Entity>(&person, ChangeKind::Update);
        let err = context.save_changes().await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(
            context.entity_state::<person::Entity>(&person),
            Some(EntityState::Modified)
        );
    }

    #[tokio::test]
    async fn test_delete_then_insert_runs_in_staging_order() {
        let connection = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1), exec(1)])
            .into_connection();
        let context = DbContext::new(connection);
        let people = sample_people(2);

        context.stage::<person::Entity>(&people[0], ChangeKind::Remove);
        context.stage::<person::Entity>(&people[1], ChangeKind::Add);

        assert_eq!(context.save_changes().await.unwrap(), 2);
        assert!(!context.is_tracked::<person::Entity>(&people[0]));

        let log = transaction_log(context);
        assert_eq!(log.len(), 1);
        let sql = format!("{:?}", log[0]);
        let delete_at = sql.find("DELETE").unwrap();
        let insert_at = sql.find("INSERT").unwrap();
        assert!(delete_at < insert_at);
    }

    #[tokio::test]
    async fn test_clones_share_tracker() {
        let context = DbContext::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let clone = context.clone();
        let person = sample_people(1).remove(0);

        clone.stage::<person::Entity>(&person, ChangeKind::Add);

        assert!(context.is_tracked::<person::Entity>(&person));
        assert_eq!(
            context.entity_state_by_id::<person::Entity>(person.entity_id),
            Some(EntityState::Added)
        );
        assert_eq!(context.discard_changes(), 1);
    }

    #[tokio::test]
    async fn test_stage_all_rejects_duplicate_ids() {
        let context = DbContext::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let person = sample_people(1).remove(0);
        let mut renamed = person.clone();
        renamed.name = Some("Second".to_string());

        let result = context.stage_all::<person::Entity>(&[person, renamed], ChangeKind::Add);

        assert!(matches!(result, Err(common::StoreError::DuplicateKey { .. })));
        assert_eq!(context.tracked_count(), 0);
        assert!(!context.has_changes());
    }

    #[tokio::test]
    async fn test_detached_inserts_keep_tracked_entity() {
        let connection = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1)])
            .into_connection();
        let context = DbContext::new(connection);
        let person = sample_people(1).remove(0);
        context.attach::<person::Entity>(person.clone());

        context.stage_detached::<person::Entity>(std::slice::from_ref(&person), "person_archive");
        assert_eq!(context.save_changes().await.unwrap(), 1);

        assert!(!context.has_changes());
        assert_eq!(
            context.entity_state::<person::Entity>(&person),
            Some(EntityState::Unchanged)
        );
        let log = transaction_log(context);
        assert!(format!("{:?}", log[0]).contains("person_archive"));
    }
}
