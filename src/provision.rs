//! Collection provisioning
//!
//! Create-or-get of the target time-series collection. Running it against a
//! collection that already exists is a logged no-op returning the existing
//! handle unchanged.

use tracing::{info, warn};

use crate::store::{Provisioned, TimeSeriesOptions, TimeSeriesStore};
use crate::Result;

/// Ensures a time-series collection exists before ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionProvisioner {
    options: TimeSeriesOptions,
}

impl CollectionProvisioner {
    /// Provisioner using `timestamp` / `metadata` as time and meta fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisioner with custom time-series options.
    #[must_use]
    pub const fn with_options(options: TimeSeriesOptions) -> Self {
        Self { options }
    }

    /// Options new collections are created with.
    #[must_use]
    pub const fn options(&self) -> &TimeSeriesOptions {
        &self.options
    }

    /// Create `name` if needed and return its handle.
    ///
    /// # Errors
    ///
    /// Returns the store's error (e.g. [`Error::Connection`](crate::Error::Connection)
    /// or [`Error::InvalidInput`](crate::Error::InvalidInput)); no handle is
    /// returned in that case.
    pub async fn ensure<S: TimeSeriesStore>(&self, store: &S, name: &str) -> Result<Provisioned> {
        let provisioned = store.create_collection(name, &self.options).await?;

        match &provisioned {
            Provisioned::Created(_) => {
                info!(collection = name, store = %store.target(), "Created time-series collection");
            }
            Provisioned::AlreadyExists(handle) => {
                warn!(
                    collection = name,
                    "Collection already exists. Using existing collection."
                );
                if !handle.is_time_series() {
                    warn!(
                        collection = name,
                        "Existing collection is not a time-series collection"
                    );
                } else if handle.options() != Some(&self.options) {
                    warn!(
                        collection = name,
                        existing = ?handle.options(),
                        requested = ?self.options,
                        "Existing collection has different time-series options"
                    );
                }
            }
        }
        info!(collection = name, "Using collection");
        Ok(provisioned)
    }
}

/// Create-or-get `name` with the default time-series options.
///
/// # Errors
///
/// See [`CollectionProvisioner::ensure`].
pub async fn ensure_collection<S: TimeSeriesStore>(store: &S, name: &str) -> Result<Provisioned> {
    CollectionProvisioner::new().ensure(store, name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::Error;

    #[tokio::test]
    async fn test_ensure_twice_returns_same_handle() {
        let store = MemoryStore::new();

        let first = ensure_collection(&store, "crack_data").await.unwrap();
        let second = ensure_collection(&store, "crack_data").await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.handle(), second.handle());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_created_with_time_series_fields() {
        let store = MemoryStore::new();
        let handle = ensure_collection(&store, "crack_data")
            .await
            .unwrap()
            .into_handle();

        let options = handle.options().unwrap();
        assert_eq!(options.time_field, "timestamp");
        assert_eq!(options.meta_field.as_deref(), Some("metadata"));
    }

    #[tokio::test]
    async fn test_custom_options() {
        let store = MemoryStore::new();
        let options = TimeSeriesOptions {
            time_field: "timestamp".to_string(),
            meta_field: None,
        };
        let provisioner = CollectionProvisioner::with_options(options.clone());

        let handle = provisioner
            .ensure(&store, "bare")
            .await
            .unwrap()
            .into_handle();
        assert_eq!(handle.options(), Some(&options));
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let store = MemoryStore::new();
        let err = ensure_collection(&store, "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
