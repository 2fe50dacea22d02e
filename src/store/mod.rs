//! Time-series store abstraction
//!
//! A store holds named collections, each configured with a time field and a
//! metadata field. Records are appended through bulk inserts that are
//! all-or-nothing per call; nothing is ever updated in place.
//!
//! # Backends
//!
//! - [`MemoryStore`] - DashMap of Arrow batches, lost on process exit
//! - [`ParquetStore`] - one directory per collection, one Parquet file per insert
//! - `MongoStore` - MongoDB time-series collections (feature `mongodb`)
//!
//! # Example
//!
//! ```rust
//! use crackmeter_db::store::{MemoryStore, TimeSeriesOptions, TimeSeriesStore};
//!
//! # async fn example() -> crackmeter_db::Result<()> {
//! let store = MemoryStore::new();
//! let provisioned = store
//!     .create_collection("crack_data", &TimeSeriesOptions::default())
//!     .await?;
//! assert!(provisioned.was_created());
//!
//! let again = store
//!     .create_collection("crack_data", &TimeSeriesOptions::default())
//!     .await?;
//! assert!(!again.was_created());
//! assert_eq!(again.handle(), provisioned.handle());
//! # Ok(())
//! # }
//! ```

mod memory;
#[cfg(feature = "mongodb")]
mod mongo;
mod parquet_store;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
pub use parquet_store::ParquetStore;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::record::{CalibratedRecord, FIELD_METADATA, FIELD_TIMESTAMP};
use crate::{Error, Result};

/// Time-series configuration of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesOptions {
    /// Field holding each document's time
    pub time_field: String,
    /// Field holding the grouping metadata, if any
    pub meta_field: Option<String>,
}

impl Default for TimeSeriesOptions {
    fn default() -> Self {
        Self {
            time_field: FIELD_TIMESTAMP.to_string(),
            meta_field: Some(FIELD_METADATA.to_string()),
        }
    }
}

/// A provisioned collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
    options: Option<TimeSeriesOptions>,
}

impl CollectionHandle {
    /// Create a handle for time-series collection `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, options: TimeSeriesOptions) -> Self {
        Self {
            name: name.into(),
            options: Some(options),
        }
    }

    /// Create a handle for a collection without time-series configuration.
    ///
    /// Only a server-side store can hold one, when the name was taken by an
    /// ordinary collection before provisioning.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: None,
        }
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time-series configuration the collection was created with, `None`
    /// for an ordinary collection.
    #[must_use]
    pub const fn options(&self) -> Option<&TimeSeriesOptions> {
        self.options.as_ref()
    }

    /// True if the collection is organized by a time field.
    #[must_use]
    pub const fn is_time_series(&self) -> bool {
        self.options.is_some()
    }
}

/// Outcome of a create-or-get.
///
/// An existing collection is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// The collection did not exist and was created
    Created(CollectionHandle),
    /// The collection already existed and is returned unchanged
    AlreadyExists(CollectionHandle),
}

impl Provisioned {
    /// Handle of the collection, however it was obtained.
    #[must_use]
    pub const fn handle(&self) -> &CollectionHandle {
        match self {
            Self::Created(handle) | Self::AlreadyExists(handle) => handle,
        }
    }

    /// Consume into the handle.
    #[must_use]
    pub fn into_handle(self) -> CollectionHandle {
        match self {
            Self::Created(handle) | Self::AlreadyExists(handle) => handle,
        }
    }

    /// True if this call created the collection.
    #[must_use]
    pub const fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of one bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertManyResult {
    /// Store-assigned identifiers, in insertion order
    pub inserted_ids: Vec<String>,
}

impl InsertManyResult {
    /// Number of documents inserted.
    #[must_use]
    pub fn inserted_count(&self) -> usize {
        self.inserted_ids.len()
    }
}

/// Check a collection name before it reaches a backend.
///
/// Names become directory names (Parquet) and namespaces (MongoDB), so path
/// separators, `$`, NUL, a leading `.` and the `system.` prefix are refused.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a name no backend can hold.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.starts_with("system.")
        || name.chars().any(|c| matches!(c, '/' | '\\' | '$' | '\0'));
    if invalid {
        return Err(Error::InvalidInput(format!(
            "'{name}' is not a valid collection name"
        )));
    }
    Ok(())
}

/// Time-series store trait.
///
/// One caller at a time: the ingestion pipeline writes batches strictly in
/// sequence, so implementations need no write ordering of their own beyond
/// preserving call order.
pub trait TimeSeriesStore: Send + Sync {
    /// Native bulk-write payload of this backend.
    type Batch: Send;

    /// Human-readable location of the store (host:port, directory), for logs.
    fn target(&self) -> String;

    /// Create `name` as a time-series collection, or return the existing one.
    fn create_collection(
        &self,
        name: &str,
        options: &TimeSeriesOptions,
    ) -> impl Future<Output = Result<Provisioned>> + Send;

    /// Look up an existing collection.
    fn collection(&self, name: &str) -> impl Future<Output = Result<Option<CollectionHandle>>> + Send;

    /// Convert records to the native write payload.
    ///
    /// # Errors
    ///
    /// Returns error if the records cannot be represented by the backend.
    fn encode(&self, records: &[CalibratedRecord]) -> Result<Self::Batch>;

    /// Insert one batch. Either every document is persisted or none is.
    fn insert_many(
        &self,
        collection: &CollectionHandle,
        batch: Self::Batch,
    ) -> impl Future<Output = Result<InsertManyResult>> + Send;

    /// All records of a collection in insertion order.
    fn find_all(
        &self,
        collection: &CollectionHandle,
    ) -> impl Future<Output = Result<Vec<CalibratedRecord>>> + Send;

    /// Number of documents in a collection.
    fn count(&self, collection: &CollectionHandle) -> impl Future<Output = Result<usize>> + Send {
        async move { Ok(self.find_all(collection).await?.len()) }
    }

    /// Release the store's resources.
    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async move {
            drop(self);
            Ok(())
        }
    }
}
