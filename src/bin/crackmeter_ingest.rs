//! Crack-meter ingestion CLI
//!
//! Loads a semicolon-separated crack-meter export, calibrates it, stamps it
//! with synthetic timestamps and writes it to a time-series collection.
//!
//! # Usage
//!
//! ```bash
//! # Parquet store under $CRACKMETER_DATA_DIR (default ./data)
//! crackmeter-ingest measurements.csv --collection crack_data
//!
//! # MongoDB at $MONGO_HOST:$MONGO_PORT, 500 records per insert
//! crackmeter-ingest measurements.csv --store mongo --batch-size 500
//!
//! # Continue a run that stopped after 300 records
//! crackmeter-ingest measurements.csv --resume-from 300 --base-time 2025-08-01T00:00:00Z
//!
//! # Only print descriptive statistics
//! crackmeter-ingest measurements.csv --summary-only
//! ```

use std::future::Future;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, ValueEnum};
use crackmeter_db::config::{
    delay_from_secs, IngestConfig, StoreConfig, DEFAULT_BATCH_SIZE, DEFAULT_COLLECTION,
    ENV_DATA_DIR,
};
use crackmeter_db::ingest::{CancellationFlag, Pacing};
use crackmeter_db::loader::load_path;
use crackmeter_db::pipeline::{Pipeline, PipelineConfig, PipelineReport};
use crackmeter_db::record::RawRecord;
use crackmeter_db::store::{MemoryStore, ParquetStore, TimeSeriesStore};
use crackmeter_db::summary::DatasetSummary;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    /// Parquet files under --data-dir
    Parquet,
    /// In-process store, discarded on exit
    Memory,
    /// MongoDB time-series collection
    Mongo,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum PacingMode {
    /// Sleep --delay-secs after every insert
    Fixed,
    /// Start inserts at least --delay-secs apart
    Interval,
}

#[derive(Parser, Debug)]
#[command(name = "crackmeter-ingest")]
#[command(about = "Calibrate crack-meter exports and ingest them into a time-series store", long_about = None)]
struct Args {
    /// Semicolon-separated export with Frequency, CurrentSet, Current, Voltage Drop and Crack size columns
    csv: PathBuf,

    /// Target collection
    #[arg(short, long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Records per bulk insert
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pause between bulk inserts, in seconds
    #[arg(short, long, default_value_t = 0.1)]
    delay_secs: f64,

    /// How the pause is applied
    #[arg(long, value_enum, default_value_t = PacingMode::Fixed)]
    pacing: PacingMode,

    /// Seconds between consecutive record timestamps
    #[arg(long, default_value_t = 1)]
    interval_secs: i64,

    /// Timestamp of the first record (RFC 3339); defaults to now
    #[arg(long, value_parser = parse_base_time)]
    base_time: Option<DateTime<Utc>>,

    /// Sensor/session identifier stored with every record
    #[arg(short, long)]
    metadata: Option<String>,

    /// Skip this many records (already committed by an earlier run)
    #[arg(long, default_value_t = 0)]
    resume_from: usize,

    /// Store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Parquet)]
    store: StoreKind,

    /// Root directory of the Parquet store
    #[arg(long, env = ENV_DATA_DIR)]
    data_dir: Option<PathBuf>,

    /// Print descriptive statistics of the calibrated data and exit
    #[arg(long)]
    summary_only: bool,
}

fn parse_base_time(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("'{value}' is not an RFC 3339 timestamp: {e}"))
}

impl Args {
    fn ingest_config(&self) -> Result<IngestConfig> {
        let delay = delay_from_secs(self.delay_secs)?;
        let pacing = match self.pacing {
            PacingMode::Fixed => Pacing::FixedDelay(delay),
            PacingMode::Interval => Pacing::MinInterval(delay),
        };
        let config = IngestConfig {
            batch_size: self.batch_size,
            pacing,
        };
        config.validate()?;
        Ok(config)
    }

    fn pipeline_config(&self, cancel: CancellationFlag) -> Result<PipelineConfig> {
        let interval = TimeDelta::try_seconds(self.interval_secs)
            .with_context(|| format!("--interval-secs {} is out of range", self.interval_secs))?;
        let mut builder = PipelineConfig::builder()
            .collection(&self.collection)
            .ingest(self.ingest_config()?)
            .interval(interval)
            .resume_offset(self.resume_from)
            .cancellation(cancel);
        if let Some(base) = self.base_time {
            builder = builder.base_time(base);
        }
        if let Some(metadata) = &self.metadata {
            builder = builder.metadata(metadata);
        }
        Ok(builder.build())
    }
}

async fn run_pipeline<S, F>(
    pipeline: &mut Pipeline,
    connect: F,
    raw: &[RawRecord],
) -> crackmeter_db::Result<PipelineReport>
where
    S: TimeSeriesStore,
    F: Future<Output = crackmeter_db::Result<S>>,
{
    pipeline.run_scoped(connect, raw).await
}

#[cfg(feature = "mongodb")]
async fn run_mongo(
    pipeline: &mut Pipeline,
    store_config: &StoreConfig,
    raw: &[RawRecord],
) -> crackmeter_db::Result<PipelineReport> {
    use crackmeter_db::store::MongoStore;
    run_pipeline(pipeline, MongoStore::connect(store_config), raw).await
}

#[cfg(not(feature = "mongodb"))]
async fn run_mongo(
    _pipeline: &mut Pipeline,
    _store_config: &StoreConfig,
    _raw: &[RawRecord],
) -> crackmeter_db::Result<PipelineReport> {
    Err(crackmeter_db::Error::InvalidInput(
        "this build has no MongoDB support; rebuild with --features mongodb".to_string(),
    ))
}

fn report_failure(error: &crackmeter_db::Error) {
    tracing::error!("Ingestion failed: {error}");
    eprintln!("Batches committed: {}", error.batches_committed());
    if let Some(offset) = error.resume_offset() {
        eprintln!("Resume with: --resume-from {offset}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let raw = load_path(&args.csv).with_context(|| format!("loading {}", args.csv.display()))?;
    tracing::info!("Loaded {} records from {}", raw.len(), args.csv.display());

    let cancel = CancellationFlag::new();
    let config = args.pipeline_config(cancel.clone())?;

    print!("{}", DatasetSummary::of(&config.prepare(&raw)?));
    if args.summary_only {
        return Ok(());
    }

    let mut store_config = StoreConfig::from_env()?;
    if let Some(dir) = &args.data_dir {
        store_config.data_dir.clone_from(dir);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current batch");
            cancel.cancel();
        }
    });

    tracing::info!("Crack-meter ingestion starting...");
    tracing::info!("  Collection: {}", args.collection);
    tracing::info!("  Store: {:?}", args.store);
    tracing::info!("  Batch size: {}", args.batch_size);

    let mut pipeline = Pipeline::new(config);
    let outcome = match args.store {
        StoreKind::Memory => {
            run_pipeline(&mut pipeline, async { Ok(MemoryStore::new()) }, &raw).await
        }
        StoreKind::Parquet => {
            let connect = ParquetStore::connect(
                store_config.data_dir.clone(),
                store_config.connect_timeout,
            );
            run_pipeline(&mut pipeline, connect, &raw).await
        }
        StoreKind::Mongo => run_mongo(&mut pipeline, &store_config, &raw).await,
    };

    match outcome {
        Ok(report) => {
            println!(
                "Inserted {} records into '{}' in {} batch(es)",
                report.ingest.records_inserted,
                report.collection.name(),
                report.ingest.batches_committed()
            );
            if report.records_skipped > 0 {
                println!("Skipped {} previously committed records", report.records_skipped);
            }
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            bail!("ingestion into '{}' did not complete", args.collection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["crackmeter-ingest", "data.csv"]);
        assert_eq!(args.collection, "crack_data");
        assert_eq!(args.batch_size, 100);
        assert_eq!(args.store, StoreKind::Parquet);

        let ingest = args.ingest_config().unwrap();
        assert_eq!(ingest.pacing, Pacing::FixedDelay(Duration::from_millis(100)));
    }

    #[test]
    fn test_interval_pacing() {
        let args = parse(&[
            "crackmeter-ingest",
            "data.csv",
            "--pacing",
            "interval",
            "--delay-secs",
            "0.5",
        ]);
        assert_eq!(
            args.ingest_config().unwrap().pacing,
            Pacing::MinInterval(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_base_time_must_be_rfc3339() {
        assert!(Args::try_parse_from(["crackmeter-ingest", "d.csv", "--base-time", "yesterday"]).is_err());
        let args = parse(&["crackmeter-ingest", "d.csv", "--base-time", "2025-08-01T02:00:00+02:00"]);
        assert_eq!(args.base_time.unwrap().to_rfc3339(), "2025-08-01T00:00:00+00:00");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = parse(&["crackmeter-ingest", "d.csv", "--batch-size", "0"]);
        assert!(args.ingest_config().is_err());
    }
}
