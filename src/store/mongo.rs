//! MongoDB time-series backend (feature `mongodb`)
//!
//! Collections are created with `timeField` / `metaField` so the server
//! buckets documents by time. A create that hits an existing namespace
//! (server error 48) is reported as [`Provisioned::AlreadyExists`].

use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, TimeseriesOptions};
use mongodb::{Client, Database};
use tracing::{debug, info};

use super::{
    validate_collection_name, CollectionHandle, InsertManyResult, Provisioned, TimeSeriesOptions,
    TimeSeriesStore,
};
use crate::config::StoreConfig;
use crate::record::{
    CalibratedReading, CalibratedRecord, FIELD_CRACK_SIZE, FIELD_CURRENT, FIELD_FREQUENCY,
    FIELD_METADATA, FIELD_SET_CURRENT, FIELD_TIMESTAMP, FIELD_VOLTAGE_DROP,
};
use crate::{Error, Result};

/// Server code for "namespace already exists"
const NAMESPACE_EXISTS: i32 = 48;

/// MongoDB-backed time-series store.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
    target: String,
}

impl MongoStore {
    /// Connect and verify the server answers a ping within the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server is unreachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let target = config.address();
        let connection_error = |reason: String| Error::Connection {
            target: target.clone(),
            reason,
        };

        let mut options = ClientOptions::parse(config.uri())
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        options.server_selection_timeout = Some(config.connect_timeout);
        options.connect_timeout = Some(config.connect_timeout);

        let client = Client::with_options(options).map_err(|e| connection_error(e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let database = client.database(&config.database);
        info!(address = %target, database = %config.database, "Connected to MongoDB");
        Ok(Self {
            client,
            database,
            target,
        })
    }

    fn storage_error(e: &mongodb::error::Error) -> Error {
        Error::StorageError(e.to_string())
    }

    /// Handle of an existing collection, with the options the server holds.
    async fn describe(&self, name: &str) -> Result<Option<CollectionHandle>> {
        let mut cursor = self
            .database
            .list_collections()
            .filter(doc! { "name": name })
            .await
            .map_err(|e| Self::storage_error(&e))?;

        if !cursor.advance().await.map_err(|e| Self::storage_error(&e))? {
            return Ok(None);
        }
        let specification = cursor
            .deserialize_current()
            .map_err(|e| Self::storage_error(&e))?;
        Ok(Some(handle_from(name, specification.options.timeseries.as_ref())))
    }
}

/// Map server-side time-series options onto a handle; an ordinary
/// collection gets a plain handle.
fn handle_from(name: &str, timeseries: Option<&TimeseriesOptions>) -> CollectionHandle {
    timeseries.map_or_else(
        || CollectionHandle::plain(name),
        |ts| {
            CollectionHandle::new(
                name,
                TimeSeriesOptions {
                    time_field: ts.time_field.clone(),
                    meta_field: ts.meta_field.clone(),
                },
            )
        },
    )
}

fn optional(value: Option<f64>) -> Bson {
    value.map_or(Bson::Null, Bson::Double)
}

fn to_document(record: &CalibratedRecord) -> Document {
    let mut document = Document::new();
    document.insert(
        FIELD_TIMESTAMP,
        BsonDateTime::from_millis(record.timestamp().timestamp_millis()),
    );
    if let Some(metadata) = record.metadata() {
        document.insert(FIELD_METADATA, metadata);
    }
    document.insert(FIELD_FREQUENCY, record.frequency_khz());
    document.insert(FIELD_SET_CURRENT, optional(record.set_current_ma()));
    document.insert(FIELD_CURRENT, optional(record.current_ma()));
    document.insert(FIELD_VOLTAGE_DROP, optional(record.voltage_drop_mv()));
    document.insert(FIELD_CRACK_SIZE, record.crack_size_mm());
    document
}

fn from_document(document: &Document) -> Result<CalibratedRecord> {
    let float = |field: &str| match document.get(field) {
        Some(Bson::Double(v)) => Ok(Some(*v)),
        Some(Bson::Int32(v)) => Ok(Some(f64::from(*v))),
        Some(Bson::Null) | None => Ok(None),
        Some(other) => Err(Error::StorageError(format!(
            "field '{field}' holds {other}, expected a number"
        ))),
    };
    let required = |field: &str| {
        float(field)?
            .ok_or_else(|| Error::StorageError(format!("document is missing '{field}'")))
    };

    let millis = document
        .get_datetime(FIELD_TIMESTAMP)
        .map_err(|e| Error::StorageError(e.to_string()))?
        .timestamp_millis();
    let timestamp = chrono::DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::StorageError(format!("stored timestamp {millis}ms is out of range"))
    })?;
    let metadata = document.get_str(FIELD_METADATA).ok().map(str::to_string);
    let reading = CalibratedReading {
        frequency_khz: required(FIELD_FREQUENCY)?,
        set_current_ma: float(FIELD_SET_CURRENT)?,
        current_ma: float(FIELD_CURRENT)?,
        voltage_drop_mv: float(FIELD_VOLTAGE_DROP)?,
        crack_size_mm: required(FIELD_CRACK_SIZE)?,
    };
    Ok(CalibratedRecord::new(reading, timestamp, metadata))
}

impl TimeSeriesStore for MongoStore {
    type Batch = Vec<Document>;

    fn target(&self) -> String {
        self.target.clone()
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &TimeSeriesOptions,
    ) -> Result<Provisioned> {
        validate_collection_name(name)?;
        let timeseries = TimeseriesOptions::builder()
            .time_field(options.time_field.clone())
            .meta_field(options.meta_field.clone())
            .build();

        match self.database.create_collection(name).timeseries(timeseries).await {
            Ok(()) => Ok(Provisioned::Created(CollectionHandle::new(name, options.clone()))),
            Err(e) => match *e.kind {
                ErrorKind::Command(ref command) if command.code == NAMESPACE_EXISTS => {
                    let existing = self.describe(name).await?.ok_or_else(|| {
                        Error::StorageError(format!(
                            "collection '{name}' was reported as existing but is not listed"
                        ))
                    })?;
                    Ok(Provisioned::AlreadyExists(existing))
                }
                _ => Err(Self::storage_error(&e)),
            },
        }
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
        validate_collection_name(name)?;
        self.describe(name).await
    }

    fn encode(&self, records: &[CalibratedRecord]) -> Result<Vec<Document>> {
        Ok(records.iter().map(to_document).collect())
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        batch: Vec<Document>,
    ) -> Result<InsertManyResult> {
        let rows = batch.len();
        let result = self
            .database
            .collection::<Document>(collection.name())
            .insert_many(batch)
            .await
            .map_err(|e| Self::storage_error(&e))?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        debug!(collection = collection.name(), rows, "Inserted documents");
        Ok(InsertManyResult {
            inserted_ids: ids
                .into_iter()
                .map(|(_, id)| match id {
                    Bson::ObjectId(oid) => oid.to_hex(),
                    other => other.to_string(),
                })
                .collect(),
        })
    }

    async fn find_all(&self, collection: &CollectionHandle) -> Result<Vec<CalibratedRecord>> {
        let mut cursor = self
            .database
            .collection::<Document>(collection.name())
            .find(doc! {})
            .sort(doc! { "timestamp": 1 })
            .await
            .map_err(|e| Self::storage_error(&e))?;

        let mut records = Vec::new();
        while cursor.advance().await.map_err(|e| Self::storage_error(&e))? {
            let document = cursor
                .deserialize_current()
                .map_err(|e| Self::storage_error(&e))?;
            records.push(from_document(&document)?);
        }
        Ok(records)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let count = self
            .database
            .collection::<Document>(collection.name())
            .count_documents(doc! {})
            .await
            .map_err(|e| Self::storage_error(&e))?;
        usize::try_from(count).map_err(|e| Error::Other(e.to_string()))
    }

    async fn close(self) -> Result<()> {
        info!(address = %self.target, "Closing MongoDB client");
        self.client.shutdown().await;
        Ok(())
    }
}
