//! Directory-backed time-series store (Arrow/Parquet)
//!
//! **Append-Only Design**:
//! - One directory per collection, holding `_collection.json` (time-series
//!   options) and one Parquet file per bulk insert
//! - A batch is written to a hidden temporary file and renamed into place,
//!   so an insert is either fully visible or absent
//! - File names carry a zero-padded sequence number; lexical order is
//!   insertion order
//!
//! ```text
//! <root>/
//!   crack_data/
//!     _collection.json
//!     batch-00000001.parquet
//!     batch-00000002.parquet
//! ```

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use super::{
    validate_collection_name, CollectionHandle, InsertManyResult, Provisioned, TimeSeriesOptions,
    TimeSeriesStore,
};
use crate::record::{records_from_batch, records_to_batch, CalibratedRecord};
use crate::{Error, Result};

/// Collection metadata file name
const METADATA_FILE: &str = "_collection.json";

/// Prefix of committed batch files
const BATCH_PREFIX: &str = "batch-";

/// Extension of committed batch files
const BATCH_EXTENSION: &str = ".parquet";

/// Durable time-series store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Open (creating if needed) the store directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the directory cannot be created or
    /// opened within `timeout` (unmounted volume, permissions, a file in the
    /// way).
    pub async fn connect(root: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let root = root.into();
        let target = root.display().to_string();

        let open = async {
            tokio::fs::create_dir_all(&root).await?;
            tokio::fs::metadata(&root).await
        };
        match tokio::time::timeout(timeout, open).await {
            Ok(Ok(meta)) if meta.is_dir() => {}
            Ok(Ok(_)) => {
                return Err(Error::Connection {
                    target,
                    reason: "not a directory".to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(Error::Connection {
                    target,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::Connection {
                    target,
                    reason: format!("timed out after {timeout:?}"),
                })
            }
        }

        info!(root = %target, "Opened Parquet store");
        Ok(Self { root })
    }

    /// Store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn read_options(dir: &Path) -> Result<Option<TimeSeriesOptions>> {
    match fs::read(dir.join(METADATA_FILE)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_options(dir: &Path, options: &TimeSeriesOptions) -> Result<()> {
    let tmp = dir.join(format!(".{METADATA_FILE}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(options)?)?;
    fs::rename(&tmp, dir.join(METADATA_FILE))?;
    Ok(())
}

fn provision(dir: &Path, name: &str, options: &TimeSeriesOptions) -> Result<Provisioned> {
    match fs::create_dir(dir) {
        Ok(()) => {
            write_options(dir, options)?;
            Ok(Provisioned::Created(CollectionHandle::new(name, options.clone())))
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if !dir.is_dir() {
                return Err(Error::StorageError(format!(
                    "'{}' exists and is not a collection directory",
                    dir.display()
                )));
            }
            let existing = match read_options(dir)? {
                Some(existing) => existing,
                None => {
                    // Interrupted create: directory without metadata
                    write_options(dir, options)?;
                    options.clone()
                }
            };
            Ok(Provisioned::AlreadyExists(CollectionHandle::new(name, existing)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Committed batch files in insertion order.
fn batch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let committed = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(BATCH_PREFIX) && n.ends_with(BATCH_EXTENSION));
        if committed {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn sequence_of(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(BATCH_PREFIX)?
        .strip_suffix(BATCH_EXTENSION)?
        .parse()
        .ok()
}

fn write_batch(dir: &Path, batch: &RecordBatch) -> Result<u64> {
    if !dir.join(METADATA_FILE).is_file() {
        return Err(Error::StorageError(format!(
            "collection '{}' does not exist",
            dir.display()
        )));
    }

    let sequence = batch_files(dir)?
        .last()
        .and_then(|p| sequence_of(p))
        .map_or(1, |last| last + 1);
    let final_path = dir.join(format!("{BATCH_PREFIX}{sequence:08}{BATCH_EXTENSION}"));
    let tmp_path = dir.join(format!(".{BATCH_PREFIX}{sequence:08}.tmp"));

    let written = (|| -> Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, &final_path)?;
    Ok(sequence)
}

fn read_collection(dir: &Path) -> Result<Vec<CalibratedRecord>> {
    if read_options(dir)?.is_none() {
        return Err(Error::StorageError(format!(
            "collection '{}' does not exist",
            dir.display()
        )));
    }

    let mut records = Vec::new();
    for path in batch_files(dir)? {
        let file = File::open(&path).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file {}: {e}", path.display()))
        })?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
            records.extend(records_from_batch(&batch)?);
        }
    }
    Ok(records)
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Other(format!("Parquet store task failed: {e}")))?
}

impl TimeSeriesStore for ParquetStore {
    type Batch = RecordBatch;

    fn target(&self) -> String {
        self.root.display().to_string()
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &TimeSeriesOptions,
    ) -> Result<Provisioned> {
        validate_collection_name(name)?;
        let dir = self.collection_dir(name);
        let name = name.to_string();
        let options = options.clone();
        blocking(move || provision(&dir, &name, &options)).await
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
        validate_collection_name(name)?;
        let dir = self.collection_dir(name);
        let name = name.to_string();
        blocking(move || Ok(read_options(&dir)?.map(|options| CollectionHandle::new(name, options))))
            .await
    }

    fn encode(&self, records: &[CalibratedRecord]) -> Result<RecordBatch> {
        records_to_batch(records)
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        batch: RecordBatch,
    ) -> Result<InsertManyResult> {
        let dir = self.collection_dir(collection.name());
        let rows = batch.num_rows();
        let sequence = blocking(move || write_batch(&dir, &batch)).await?;

        debug!(collection = collection.name(), sequence, rows, "Committed Parquet batch");
        Ok(InsertManyResult {
            inserted_ids: (0..rows).map(|row| format!("{sequence:08}:{row}")).collect(),
        })
    }

    async fn find_all(&self, collection: &CollectionHandle) -> Result<Vec<CalibratedRecord>> {
        let dir = self.collection_dir(collection.name());
        blocking(move || read_collection(&dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CalibratedReading;
    use chrono::{TimeDelta, TimeZone, Utc};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[allow(clippy::cast_precision_loss)]
    fn records(n: usize, offset: usize) -> Vec<CalibratedRecord> {
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        (offset..offset + n)
            .map(|i| {
                let reading = CalibratedReading {
                    frequency_khz: 30.0,
                    set_current_ma: Some(130.0),
                    current_ma: (i % 2 == 0).then_some(125.0),
                    voltage_drop_mv: Some(i as f64 * 0.0625),
                    crack_size_mm: 3.0,
                };
                CalibratedRecord::new(
                    reading,
                    base + TimeDelta::seconds(i as i64),
                    Some("crack-meter-1".to_string()),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("store");

        let store = ParquetStore::connect(&root, TIMEOUT).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
    }

    #[tokio::test]
    async fn test_connect_to_file_is_connection_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let err = ParquetStore::connect(&file, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let options = TimeSeriesOptions::default();

        let store = ParquetStore::connect(tmp.path(), TIMEOUT).await.unwrap();
        let created = store.create_collection("crack_data", &options).await.unwrap();
        assert!(created.was_created());

        let reopened = ParquetStore::connect(tmp.path(), TIMEOUT).await.unwrap();
        let existing = reopened.create_collection("crack_data", &options).await.unwrap();
        assert!(!existing.was_created());
        assert_eq!(existing.handle(), created.handle());
        assert_eq!(
            reopened.collection("crack_data").await.unwrap().as_ref(),
            Some(created.handle())
        );
    }

    #[tokio::test]
    async fn test_batches_persist_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ParquetStore::connect(tmp.path(), TIMEOUT).await.unwrap();
        let handle = store
            .create_collection("crack_data", &TimeSeriesOptions::default())
            .await
            .unwrap()
            .into_handle();

        let first = records(4, 0);
        let second = records(3, 4);
        let r1 = store
            .insert_many(&handle, store.encode(&first).unwrap())
            .await
            .unwrap();
        store
            .insert_many(&handle, store.encode(&second).unwrap())
            .await
            .unwrap();

        assert_eq!(r1.inserted_ids[0], "00000001:0");
        let reopened = ParquetStore::connect(tmp.path(), TIMEOUT).await.unwrap();
        let stored = reopened.find_all(&handle).await.unwrap();
        let expected: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(stored, expected);
        assert_eq!(reopened.count(&handle).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_insert_without_collection_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ParquetStore::connect(tmp.path(), TIMEOUT).await.unwrap();
        let handle = CollectionHandle::new("missing", TimeSeriesOptions::default());

        let batch = store.encode(&records(1, 0)).unwrap();
        assert!(store.insert_many(&handle, batch).await.is_err());
        assert!(store.collection("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_sequence_parsing() {
        assert_eq!(sequence_of(Path::new("/x/batch-00000042.parquet")), Some(42));
        assert_eq!(sequence_of(Path::new("/x/.batch-00000042.tmp")), None);
        assert_eq!(sequence_of(Path::new("/x/_collection.json")), None);
    }
}
