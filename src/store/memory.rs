//! In-memory time-series store using `DashMap`.
//!
//! Data is lost on process restart. For persistence, use
//! [`ParquetStore`](super::ParquetStore).

use std::sync::atomic::{AtomicU64, Ordering};

use arrow::record_batch::RecordBatch;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{CollectionHandle, InsertManyResult, Provisioned, TimeSeriesOptions, TimeSeriesStore};
use crate::record::{records_from_batch, records_to_batch, CalibratedRecord};
use crate::{Error, Result};

#[derive(Debug)]
struct MemoryCollection {
    options: TimeSeriesOptions,
    batches: Vec<RecordBatch>,
}

/// In-memory time-series store.
///
/// Each collection is an append-only list of Arrow batches, one per
/// successful `insert_many`.
///
/// # Example
///
/// ```rust
/// use crackmeter_db::store::{MemoryStore, TimeSeriesOptions, TimeSeriesStore};
///
/// # async fn example() -> crackmeter_db::Result<()> {
/// let store = MemoryStore::new();
/// let handle = store
///     .create_collection("crack_data", &TimeSeriesOptions::default())
///     .await?
///     .into_handle();
/// assert_eq!(store.count(&handle).await?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, MemoryCollection>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Check if the store holds no collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Number of bulk inserts committed to `name`.
    #[must_use]
    pub fn batch_count(&self, name: &str) -> usize {
        self.collections.get(name).map_or(0, |c| c.batches.len())
    }
}

impl TimeSeriesStore for MemoryStore {
    type Batch = RecordBatch;

    fn target(&self) -> String {
        "memory".to_string()
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &TimeSeriesOptions,
    ) -> Result<Provisioned> {
        super::validate_collection_name(name)?;
        Ok(match self.collections.entry(name.to_string()) {
            Entry::Occupied(existing) => Provisioned::AlreadyExists(CollectionHandle::new(
                name,
                existing.get().options.clone(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(MemoryCollection {
                    options: options.clone(),
                    batches: Vec::new(),
                });
                Provisioned::Created(CollectionHandle::new(name, options.clone()))
            }
        })
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
        Ok(self
            .collections
            .get(name)
            .map(|c| CollectionHandle::new(name, c.options.clone())))
    }

    fn encode(&self, records: &[CalibratedRecord]) -> Result<RecordBatch> {
        records_to_batch(records)
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        batch: RecordBatch,
    ) -> Result<InsertManyResult> {
        let mut entry = self.collections.get_mut(collection.name()).ok_or_else(|| {
            Error::StorageError(format!("collection '{}' does not exist", collection.name()))
        })?;

        let rows = batch.num_rows() as u64;
        let first = self.next_id.fetch_add(rows, Ordering::SeqCst);
        let inserted_ids = (first..first + rows).map(|id| format!("{id:016x}")).collect();

        entry.batches.push(batch);
        debug!(collection = collection.name(), rows, "Appended batch");
        Ok(InsertManyResult { inserted_ids })
    }

    async fn find_all(&self, collection: &CollectionHandle) -> Result<Vec<CalibratedRecord>> {
        let entry = self.collections.get(collection.name()).ok_or_else(|| {
            Error::StorageError(format!("collection '{}' does not exist", collection.name()))
        })?;

        let mut records = Vec::new();
        for batch in &entry.batches {
            records.extend(records_from_batch(batch)?);
        }
        Ok(records)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        Ok(self
            .collections
            .get(collection.name())
            .map_or(0, |c| c.batches.iter().map(RecordBatch::num_rows).sum()))
    }
}
