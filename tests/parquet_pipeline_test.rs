//! Integration test: pipeline against the Parquet store
//!
//! Tests the durable path end to end:
//! 1. Connect (scoped: store closed on every exit path)
//! 2. Provision the collection directory
//! 3. Commit one Parquet file per batch
//! 4. Reopen and read back in insertion order

use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use crackmeter_db::config::IngestConfig;
use crackmeter_db::pipeline::{Pipeline, PipelineConfig, PipelineState};
use crackmeter_db::record::RawRecord;
use crackmeter_db::store::{ParquetStore, TimeSeriesStore};
use crackmeter_db::Error;

const TIMEOUT: Duration = Duration::from_secs(5);

#[allow(clippy::cast_precision_loss)]
fn raw_records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| RawRecord {
            frequency_khz: 30.0,
            set_current_raw: Some(1500.0),
            current_raw: (i % 3 != 0).then_some(1480.0),
            voltage_drop_raw: Some(i as f64),
            crack_size_mm: 1.0 + i as f64 * 0.001,
        })
        .collect()
}

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .collection("crack_data")
        .ingest(IngestConfig::new(25, Duration::ZERO).unwrap())
        .base_time(Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap())
        .metadata("rig-2")
        .build()
}

#[tokio::test]
async fn test_parquet_pipeline_persists_every_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let raw = raw_records(60);

    let mut pipeline = Pipeline::new(config());
    let report = pipeline
        .run_scoped(ParquetStore::connect(root.clone(), TIMEOUT), &raw)
        .await
        .unwrap();

    assert_eq!(pipeline.state(), PipelineState::Completed);
    assert_eq!(report.ingest.batches_committed(), 3);

    let batch_files = std::fs::read_dir(root.join("crack_data"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".parquet"))
        .count();
    assert_eq!(batch_files, 3);

    let reopened = ParquetStore::connect(root, TIMEOUT).await.unwrap();
    let stored = reopened.find_all(&report.collection).await.unwrap();
    assert_eq!(stored.len(), 60);
    assert_eq!(stored[0].current_ma(), None);
    assert!(stored[1].current_ma().is_some());
    assert_eq!(
        stored[59].timestamp() - stored[0].timestamp(),
        TimeDelta::seconds(59)
    );
    assert!(stored.iter().all(|r| r.metadata() == Some("rig-2")));
}

#[tokio::test]
async fn test_unreachable_store_fails_before_provisioning() {
    let tmp = tempfile::tempdir().unwrap();
    let blocked = tmp.path().join("not-a-dir");
    std::fs::write(&blocked, b"occupied").unwrap();

    let mut pipeline = Pipeline::new(config());
    let err = pipeline
        .run_scoped(ParquetStore::connect(blocked, TIMEOUT), &raw_records(10))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection { .. }));
    assert_eq!(err.batches_committed(), 0);
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[tokio::test]
async fn test_empty_input_still_provisions() {
    let tmp = tempfile::tempdir().unwrap();

    let report = Pipeline::new(config())
        .run_scoped(ParquetStore::connect(tmp.path(), TIMEOUT), &[])
        .await
        .unwrap();

    assert_eq!(report.ingest.batches_committed(), 0);
    assert!(report.created_collection);
    assert!(tmp.path().join("crack_data").join("_collection.json").is_file());
}
