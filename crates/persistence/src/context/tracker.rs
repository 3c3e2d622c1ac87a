//! Change tracker - the tracked-entity set of a context.
//!
//! Entries are keyed by entity type and identifier. Each entry holds the
//! last known state of the record and what has to happen to it on the next
//! commit. Records are type-erased behind [`TrackedRecord`] so one tracker
//! serves every entity type of a context.
//!
//! Bulk inserts bypass the identity map: they are queued as detached
//! inserts, flushed with the next commit and never become tracked.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::sea_query::{Alias, Query, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, DbBackend, DbErr, EntityTrait, Iterable, ModelTrait,
    PrimaryKeyToColumn, QueryFilter, QueryTrait, Statement,
};

use common::{StoreError, StoreResult};
use domain::{Entity, MAX_INSERT_PARAMETERS};

use crate::repository::bulk::column_mapping;

/// Tracking state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Persisted and not changed since
    Unchanged,
    /// Inserted on next commit
    Added,
    /// Updated on next commit
    Modified,
    /// Deleted on next commit
    Deleted,
}

/// Kind of change staged by a repository or unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// Identity of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    entity_type: TypeId,
    id: String,
}

impl TrackKey {
    pub(crate) fn of<E>(model: &E::Model) -> Self
    where
        E: EntityTrait,
        E::Model: Entity,
    {
        Self {
            entity_type: TypeId::of::<E>(),
            id: model.entity_key(),
        }
    }

    pub(crate) fn for_id<E: EntityTrait>(id: impl ToString) -> Self {
        Self {
            entity_type: TypeId::of::<E>(),
            id: id.to_string(),
        }
    }

    pub(crate) fn entity_type(&self) -> TypeId {
        self.entity_type
    }
}

/// Type-erased record held by the tracker.
///
/// Knows how to render the statements that persist it.
pub(crate) trait TrackedRecord: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Table the record belongs to
    fn table(&self) -> String;

    /// Human readable `table#id` for error messages
    fn describe(&self) -> String;

    /// INSERT statements for `batch` (which must hold records of this type)
    /// into `table`, split so no statement exceeds the parameter budget.
    fn insert_statements(
        &self,
        batch: &[Arc<dyn TrackedRecord>],
        table: &str,
        backend: DbBackend,
    ) -> Result<Vec<Statement>, DbErr>;

    /// UPDATE of every non-key column, `None` when there is nothing to set
    fn update_statement(&self, backend: DbBackend) -> Option<Statement>;

    fn delete_statement(&self, backend: DbBackend) -> Statement;
}

/// Concrete record of entity `E`.
pub(crate) struct Record<E: EntityTrait> {
    model: E::Model,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Record<E>
where
    E: EntityTrait,
    E::Model: Entity + Clone + Send + Sync,
{
    pub(crate) fn new(model: E::Model) -> Self {
        Self {
            model,
            _entity: PhantomData,
        }
    }

    pub(crate) fn model(&self) -> &E::Model {
        &self.model
    }
}

/// Condition matching the primary key of `model`.
pub(crate) fn primary_key_condition<E: EntityTrait>(model: &E::Model) -> Condition {
    E::PrimaryKey::iter().fold(Condition::all(), |condition, key| {
        let column = key.into_column();
        condition.add(column.eq(model.get(column)))
    })
}

impl<E> TrackedRecord for Record<E>
where
    E: EntityTrait,
    E::Model: Entity + Clone + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table(&self) -> String {
        E::default().table_name().to_string()
    }

    fn describe(&self) -> String {
        format!("{}#{}", self.table(), self.model.entity_key())
    }

    fn insert_statements(
        &self,
        batch: &[Arc<dyn TrackedRecord>],
        table: &str,
        backend: DbBackend,
    ) -> Result<Vec<Statement>, DbErr> {
        let mapping = column_mapping::<E>();
        if mapping.is_empty() {
            return Err(DbErr::Custom(format!("{} has no writable columns", self.table())));
        }

        let rows_per_statement = (MAX_INSERT_PARAMETERS / mapping.len()).max(1);
        let models: Vec<&E::Model> = batch
            .iter()
            .filter_map(|record| record.as_any().downcast_ref::<Record<E>>())
            .map(Record::model)
            .collect();

        let mut statements = Vec::new();
        for chunk in models.chunks(rows_per_statement) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(table))
                .columns(mapping.iter().map(|entry| Alias::new(entry.destination.as_str())));

            for model in chunk {
                let values = mapping
                    .iter()
                    .map(|entry| SimpleExpr::from(model.get(entry.source)));
                insert
                    .values(values)
                    .map_err(|e| DbErr::Custom(format!("Failed to build insert: {}", e)))?;
            }

            statements.push(backend.build(&insert));
        }

        Ok(statements)
    }

    fn update_statement(&self, backend: DbBackend) -> Option<Statement> {
        let mapping = column_mapping::<E>();
        let mut values = mapping.iter().filter(|entry| !entry.primary_key).peekable();
        values.peek()?;

        let update = values.fold(E::update_many(), |update, entry| {
            update.col_expr(entry.source, self.model.get(entry.source).into())
        });

        Some(
            update
                .filter(primary_key_condition::<E>(&self.model))
                .build(backend),
        )
    }

    fn delete_statement(&self, backend: DbBackend) -> Statement {
        E::delete_many()
            .filter(primary_key_condition::<E>(&self.model))
            .build(backend)
    }
}

/// Fail when two of `models` share an identifier.
pub(crate) fn ensure_distinct<E>(models: &[E::Model]) -> StoreResult<()>
where
    E: EntityTrait,
    E::Model: Entity,
{
    let mut seen = HashSet::with_capacity(models.len());
    for model in models {
        let key = model.entity_key();
        if !seen.insert(key.clone()) {
            return Err(StoreError::duplicate_key(format!(
                "{}#{}",
                E::default().table_name(),
                key
            )));
        }
    }
    Ok(())
}

/// One tracked entity.
pub(crate) struct TrackedEntry {
    pub(crate) state: EntityState,
    pub(crate) record: Arc<dyn TrackedRecord>,
    /// Staging order, also used to detect changes made during a commit
    pub(crate) sequence: u64,
}

/// Insert queued outside the identity map.
struct DetachedInsert {
    key: TrackKey,
    sequence: u64,
    record: Arc<dyn TrackedRecord>,
    destination: String,
}

/// A pending change captured at the start of a commit.
pub(crate) struct PendingChange {
    pub(crate) key: TrackKey,
    pub(crate) sequence: u64,
    pub(crate) state: EntityState,
    pub(crate) record: Arc<dyn TrackedRecord>,
    pub(crate) destination: Option<String>,
    /// Queued by the bulk writer, not part of the identity map
    pub(crate) detached: bool,
}

impl PendingChange {
    pub(crate) fn table(&self) -> String {
        self.destination
            .clone()
            .unwrap_or_else(|| self.record.table())
    }
}

/// The tracked-entity set.
#[derive(Default)]
pub(crate) struct ChangeTracker {
    entries: HashMap<TrackKey, TrackedEntry>,
    detached: Vec<DetachedInsert>,
    next_sequence: u64,
}

impl ChangeTracker {
    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Stage one change and return the key it is tracked under.
    pub(crate) fn stage<E>(&mut self, model: E::Model, kind: ChangeKind) -> TrackKey
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        let key = TrackKey::of::<E>(&model);
        let sequence = self.next_sequence();
        let current = self.entries.get(&key).map(|entry| entry.state);

        let next = match (kind, current) {
            (ChangeKind::Add, None) => Some(EntityState::Added),
            (ChangeKind::Add, Some(EntityState::Added)) => Some(EntityState::Added),
            (ChangeKind::Add, Some(_)) => Some(EntityState::Modified),
            (ChangeKind::Update, Some(EntityState::Added)) => Some(EntityState::Added),
            (ChangeKind::Update, _) => Some(EntityState::Modified),
            // never persisted, nothing to delete
            (ChangeKind::Remove, Some(EntityState::Added)) => None,
            (ChangeKind::Remove, _) => Some(EntityState::Deleted),
        };

        match next {
            Some(state) => {
                self.entries.insert(
                    key.clone(),
                    TrackedEntry {
                        state,
                        record: Arc::new(Record::<E>::new(model)),
                        sequence,
                    },
                );
            }
            None => {
                self.entries.remove(&key);
            }
        }

        key
    }

    /// Queue an insert of `model` into `table` without tracking it.
    ///
    /// Returns the sequence number the insert is queued under.
    pub(crate) fn stage_detached<E>(&mut self, model: E::Model, table: &str) -> u64
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        let sequence = self.next_sequence();
        self.detached.push(DetachedInsert {
            key: TrackKey::of::<E>(&model),
            sequence,
            record: Arc::new(Record::<E>::new(model)),
            destination: table.to_string(),
        });
        sequence
    }

    /// Drop queued detached inserts, committed or not.
    pub(crate) fn forget_detached(&mut self, sequences: &[u64]) {
        let sequences: HashSet<u64> = sequences.iter().copied().collect();
        self.detached
            .retain(|insert| !sequences.contains(&insert.sequence));
    }

    /// Track a record read from the store.
    ///
    /// Returns the tracked snapshot when the identity is already tracked.
    pub(crate) fn attach<E>(&mut self, model: E::Model) -> E::Model
    where
        E: EntityTrait,
        E::Model: Entity + Clone + Send + Sync,
    {
        let key = TrackKey::of::<E>(&model);
        if let Some(entry) = self.entries.get(&key) {
            if let Some(record) = entry.record.as_any().downcast_ref::<Record<E>>() {
                return record.model().clone();
            }
        }

        let sequence = self.next_sequence();
        self.entries.insert(
            key,
            TrackedEntry {
                state: EntityState::Unchanged,
                record: Arc::new(Record::<E>::new(model.clone())),
                sequence,
            },
        );
        model
    }

    pub(crate) fn detach(&mut self, key: &TrackKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn state(&self, key: &TrackKey) -> Option<EntityState> {
        self.entries.get(key).map(|entry| entry.state)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.detached.is_empty()
            || self
                .entries
                .values()
                .any(|entry| entry.state != EntityState::Unchanged)
    }

    /// Pending changes in staging order.
    pub(crate) fn pending(&self) -> Vec<PendingChange> {
        let mut pending: Vec<PendingChange> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state != EntityState::Unchanged)
            .map(|(key, entry)| PendingChange {
                key: key.clone(),
                sequence: entry.sequence,
                state: entry.state,
                record: Arc::clone(&entry.record),
                destination: None,
                detached: false,
            })
            .chain(self.detached.iter().map(|insert| PendingChange {
                key: insert.key.clone(),
                sequence: insert.sequence,
                state: EntityState::Added,
                record: Arc::clone(&insert.record),
                destination: Some(insert.destination.clone()),
                detached: true,
            }))
            .collect();

        pending.sort_by_key(|change| change.sequence);
        pending
    }

    /// Mark committed changes as persisted.
    ///
    /// Entries restaged while the commit was running keep their new state.
    pub(crate) fn accept(&mut self, committed: &[PendingChange]) {
        let detached: Vec<u64> = committed
            .iter()
            .filter(|change| change.detached)
            .map(|change| change.sequence)
            .collect();
        self.forget_detached(&detached);

        for change in committed.iter().filter(|change| !change.detached) {
            let Some(entry) = self.entries.get_mut(&change.key) else {
                continue;
            };
            if entry.sequence != change.sequence {
                continue;
            }

            if entry.state == EntityState::Deleted {
                self.entries.remove(&change.key);
            } else {
                entry.state = EntityState::Unchanged;
            }
        }
    }

    /// Forget every pending change; unchanged entries stay tracked.
    pub(crate) fn discard(&mut self) -> usize {
        let before = self.entries.len() + self.detached.len();
        self.detached.clear();
        self.entries
            .retain(|_, entry| entry.state == EntityState::Unchanged);
        before - self.entries.len()
    }
}
