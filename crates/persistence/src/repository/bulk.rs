//! Bulk writer.
//!
//! Splits a collection into fixed-size batches; each batch is queued as
//! detached inserts and committed on its own. Bulk rows never enter the
//! tracked-entity set, so entities already tracked keep their state.
//! Earlier batches stay committed when a later one fails.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use sea_orm::{EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn, PrimaryKeyTrait};

use common::{StoreError, StoreResult};
use domain::{Entity, BULK_WRITE_BATCH_SIZE};

use crate::context::tracker::ensure_distinct;
use crate::context::DataContext;

use super::generic::Repository;

/// Writable field of an entity and the column it lands in.
#[derive(Debug, Clone)]
pub struct ColumnMapping<C> {
    pub source: C,
    pub destination: String,
    pub primary_key: bool,
}

type CachedMapping = Arc<dyn Any + Send + Sync>;

static MAPPINGS: Lazy<RwLock<HashMap<TypeId, CachedMapping>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Column mapping of `E`, built on first use and cached per entity type.
pub fn column_mapping<E: EntityTrait>() -> Arc<Vec<ColumnMapping<E::Column>>> {
    let type_id = TypeId::of::<E>();

    let cached = MAPPINGS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
        .cloned();
    if let Some(mapping) = cached.and_then(|m| m.downcast::<Vec<ColumnMapping<E::Column>>>().ok()) {
        return mapping;
    }

    let cached = MAPPINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(type_id)
        .or_insert_with(|| {
            let mapping = build_mapping::<E>();
            tracing::debug!(
                entity = E::default().table_name(),
                columns = mapping.len(),
                "Column mapping built"
            );
            Arc::new(mapping) as CachedMapping
        })
        .clone();

    cached
        .downcast::<Vec<ColumnMapping<E::Column>>>()
        .unwrap_or_else(|_| Arc::new(build_mapping::<E>()))
}

fn build_mapping<E: EntityTrait>() -> Vec<ColumnMapping<E::Column>> {
    let keys: Vec<String> = E::PrimaryKey::iter()
        .map(|key| key.into_column().as_str().to_string())
        .collect();
    // generated keys are assigned by the store
    let generated = <E::PrimaryKey as PrimaryKeyTrait>::auto_increment();

    E::Column::iter()
        .filter_map(|column| {
            let primary_key = keys.iter().any(|key| key == column.as_str());
            if primary_key && generated {
                return None;
            }

            Some(ColumnMapping {
                source: column,
                destination: column.as_str().to_string(),
                primary_key,
            })
        })
        .collect()
}

/// Number of batches needed for `count` entities.
pub fn batch_count(count: usize) -> usize {
    count.div_ceil(BULK_WRITE_BATCH_SIZE)
}

impl<E, C> Repository<E, C>
where
    E: EntityTrait + 'static,
    E::Model: Entity + Clone + Send + Sync,
    C: DataContext,
{
    /// Bulk insert into the entity's own table.
    pub async fn bulk_write(&self, entities: &[E::Model], timeout_secs: u64) -> StoreResult<u64> {
        let table = E::default().table_name().to_string();
        self.bulk_write_into(entities, &table, timeout_secs).await
    }

    /// Bulk insert into `table_name`.
    ///
    /// Returns the number of rows written. An empty collection returns 0
    /// without touching the store. Two entities with the same id fail the
    /// whole call before any batch is written. A `timeout_secs` of 0
    /// disables the per batch timeout.
    pub async fn bulk_write_into(
        &self,
        entities: &[E::Model],
        table_name: &str,
        timeout_secs: u64,
    ) -> StoreResult<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        ensure_distinct::<E>(entities)?;

        let context = self.source.context().await?;
        let batches = batch_count(entities.len());
        let mut written = 0;

        for (index, batch) in entities.chunks(BULK_WRITE_BATCH_SIZE).enumerate() {
            let queued = context.stage_detached::<E>(batch, table_name);

            let result = self.commit_batch(timeout_secs).await;
            context.forget_detached(&queued);

            let rows = match result {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(
                        table = table_name,
                        batch = index + 1,
                        batches,
                        written,
                        error = %e,
                        "Bulk write failed"
                    );
                    return Err(e);
                }
            };

            written += rows;
            tracing::debug!(table = table_name, batch = index + 1, batches, rows, "Bulk batch written");
        }

        tracing::info!(table = table_name, rows = written, batches, "Bulk write finished");
        Ok(written)
    }

    async fn commit_batch(&self, timeout_secs: u64) -> StoreResult<u64> {
        if timeout_secs == 0 {
            return self.source.commit().await;
        }

        tokio::time::timeout(Duration::from_secs(timeout_secs), self.source.commit())
            .await
            .map_err(|_| StoreError::Timeout {
                seconds: timeout_secs,
            })?
    }
}
