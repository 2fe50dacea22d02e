//! Calibration and ingestion pipeline
//!
//! ```text
//! raw rows ─> calibrate ─> stamp ─> provision collection ─> paced batch inserts
//! ```
//!
//! ## State machine
//!
//! ```text
//! Idle ─> Provisioning ─> Writing(1) ─> Pausing(1) ─> Writing(2) ─> ... ─> Completed
//!              │              │             │              │
//!              └──────────────┴─────────────┴──────────────┴─────> Failed
//! ```
//!
//! `Writing` and `Pausing` are the two phases of ingestion. `Pausing` only
//! fails on cancellation. `Completed` and `Failed` are terminal; a pipeline
//! runs once.

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::calibration::calibrate_all;
use crate::config::{IngestConfig, DEFAULT_COLLECTION};
use crate::ingest::{BatchIngestor, CancellationFlag, IngestEvent, IngestReport};
use crate::provision::CollectionProvisioner;
use crate::record::{CalibratedRecord, RawRecord};
use crate::store::{CollectionHandle, TimeSeriesStore};
use crate::timestamp::{Timestamper, DEFAULT_INTERVAL_SECS};
use crate::{Error, Result};

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Connecting to the store and ensuring the collection exists
    Provisioning,
    /// Bulk insert of a chunk in flight (ingesting)
    Writing {
        /// 1-based chunk number
        batch_number: usize,
    },
    /// Waiting between chunks (ingesting)
    Pausing {
        /// Chunk just committed
        after_batch: usize,
    },
    /// Every chunk committed
    Completed,
    /// Stopped by an error or cancellation
    Failed,
}

impl PipelineState {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Provisioning)
            | (Self::Provisioning | Self::Pausing { .. }, Self::Writing { .. })
            | (Self::Writing { .. }, Self::Pausing { .. })
            | (Self::Provisioning | Self::Writing { .. }, Self::Completed)
            | (Self::Provisioning | Self::Writing { .. } | Self::Pausing { .. }, Self::Failed) => {
                true
            }
            _ => false,
        }
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
struct StateMachine {
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(&next) {
            warn!(from = ?self.state, to = ?next, "Unexpected pipeline transition");
        }
        self.state = next;
        self.history.push(next);
    }
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Target collection
    pub collection: String,
    /// Batch size and pacing
    pub ingest: IngestConfig,
    /// Timestamp of the first record (`None` = now, at run time)
    pub base_time: Option<DateTime<Utc>>,
    /// Spacing of synthetic timestamps
    pub interval: TimeDelta,
    /// Sensor/session identifier attached to every record
    pub metadata: Option<String>,
    /// Records already ingested by an earlier run; skipped here
    pub resume_offset: usize,
    /// Cooperative cancellation
    pub cancel: Option<CancellationFlag>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            ingest: IngestConfig::default(),
            base_time: None,
            interval: TimeDelta::seconds(DEFAULT_INTERVAL_SECS),
            metadata: None,
            resume_offset: 0,
            cancel: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Calibrate and stamp raw rows.
    ///
    /// Timestamps cover the whole input, so a resumed run with the same base
    /// time reproduces the original time axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a non-positive interval or a
    /// timestamp overflow.
    pub fn prepare(&self, raw: &[RawRecord]) -> Result<Vec<CalibratedRecord>> {
        let base = self.base_time.unwrap_or_else(Utc::now);
        let stamper = Timestamper::with_interval(base, self.interval)?;
        stamper.stamp(calibrate_all(raw), self.metadata.as_deref())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the target collection
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Set batch size and pacing
    #[must_use]
    pub const fn ingest(mut self, ingest: IngestConfig) -> Self {
        self.config.ingest = ingest;
        self
    }

    /// Set the first record's timestamp
    #[must_use]
    pub const fn base_time(mut self, base: DateTime<Utc>) -> Self {
        self.config.base_time = Some(base);
        self
    }

    /// Set the timestamp spacing
    #[must_use]
    pub const fn interval(mut self, interval: TimeDelta) -> Self {
        self.config.interval = interval;
        self
    }

    /// Attach a sensor/session identifier
    #[must_use]
    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.config.metadata = Some(metadata.into());
        self
    }

    /// Skip records committed by an earlier run
    #[must_use]
    pub const fn resume_offset(mut self, offset: usize) -> Self {
        self.config.resume_offset = offset;
        self
    }

    /// Stop at the next chunk boundary once `flag` is set
    #[must_use]
    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.config.cancel = Some(flag);
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Collection written to
    pub collection: CollectionHandle,
    /// True if this run created the collection
    pub created_collection: bool,
    /// Records in the input
    pub records_total: usize,
    /// Records skipped because an earlier run committed them
    pub records_skipped: usize,
    /// Batch-level outcome
    pub ingest: IngestReport,
}

/// One-shot calibration and ingestion run.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    machine: StateMachine,
}

impl Pipeline {
    /// Create an idle pipeline.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            machine: StateMachine::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.machine.state
    }

    /// Every state visited so far, starting with `Idle`.
    #[must_use]
    pub fn history(&self) -> &[PipelineState] {
        &self.machine.history
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run against an already connected store.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the pipeline already ran or the config is
    ///   unusable (state stays `Idle`)
    /// - any provisioning error, [`Error::Write`] or [`Error::Cancelled`]
    ///   (state becomes `Failed`)
    pub async fn run<S: TimeSeriesStore>(
        &mut self,
        store: &S,
        raw: &[RawRecord],
    ) -> Result<PipelineReport> {
        let records = self.begin(raw)?;
        self.drive(store, &records).await
    }

    /// Connect, run, and close the store on every exit path.
    ///
    /// A connection failure is a provisioning failure: the pipeline ends in
    /// `Failed` without writing anything.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus the connection error from `connect`.
    /// A close failure after a successful run is returned as well.
    pub async fn run_scoped<S, F>(&mut self, connect: F, raw: &[RawRecord]) -> Result<PipelineReport>
    where
        S: TimeSeriesStore,
        F: Future<Output = Result<S>>,
    {
        let records = self.begin(raw)?;
        let store = match connect.await {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "Cannot connect to store");
                self.machine.advance(PipelineState::Failed);
                return Err(e);
            }
        };

        let outcome = self.drive(&store, &records).await;
        let closed = store.close().await;
        match (outcome, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "Store close failed after a failed run");
                }
                Err(e)
            }
        }
    }

    /// Validate, prepare records and enter `Provisioning`.
    fn begin(&mut self, raw: &[RawRecord]) -> Result<Vec<CalibratedRecord>> {
        if self.machine.state != PipelineState::Idle {
            return Err(Error::InvalidInput(format!(
                "pipeline already ran (state {:?})",
                self.machine.state
            )));
        }
        self.config.ingest.validate()?;
        if self.config.resume_offset > raw.len() {
            return Err(Error::InvalidInput(format!(
                "resume offset {} is beyond the {} input records",
                self.config.resume_offset,
                raw.len()
            )));
        }

        let records = self.config.prepare(raw)?;
        info!(records = records.len(), "Calibrated and timestamped records");
        self.machine.advance(PipelineState::Provisioning);
        Ok(records)
    }

    async fn drive<S: TimeSeriesStore>(
        &mut self,
        store: &S,
        records: &[CalibratedRecord],
    ) -> Result<PipelineReport> {
        let provisioned = match CollectionProvisioner::new()
            .ensure(store, &self.config.collection)
            .await
        {
            Ok(provisioned) => provisioned,
            Err(e) => {
                error!(error = %e, collection = %self.config.collection, "Provisioning failed");
                self.machine.advance(PipelineState::Failed);
                return Err(e);
            }
        };
        let created_collection = provisioned.was_created();
        let collection = provisioned.into_handle();

        let offset = self.config.resume_offset;
        if offset > 0 {
            info!(offset, "Resuming after records committed by an earlier run");
        }
        let mut ingestor = BatchIngestor::new(self.config.ingest)?.with_record_offset(offset);
        if let Some(flag) = &self.config.cancel {
            ingestor = ingestor.with_cancellation(flag.clone());
        }

        let machine = &mut self.machine;
        let outcome = ingestor
            .ingest_with(store, &collection, &records[offset..], |event| match event {
                IngestEvent::Writing { batch_number, .. } => machine.advance(PipelineState::Writing {
                    batch_number: *batch_number,
                }),
                IngestEvent::Pausing { after_batch, .. } => machine.advance(PipelineState::Pausing {
                    after_batch: *after_batch,
                }),
                IngestEvent::Committed(_) => {}
            })
            .await;

        match outcome {
            Ok(ingest) => {
                self.machine.advance(PipelineState::Completed);
                info!(
                    collection = collection.name(),
                    batches = ingest.batches_committed(),
                    records = ingest.records_inserted,
                    "All data inserted successfully"
                );
                Ok(PipelineReport {
                    collection,
                    created_collection,
                    records_total: records.len(),
                    records_skipped: offset,
                    ingest,
                })
            }
            Err(e) => {
                self.machine.advance(PipelineState::Failed);
                error!(
                    batches_committed = e.batches_committed(),
                    resume_offset = ?e.resume_offset(),
                    "Ingestion stopped"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TimeSeriesStore};
    use chrono::TimeZone;
    use std::time::Duration;

    fn raw(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| RawRecord::new(30.0, 1000.0, 900.0, 1024.0, f64::from(u32::try_from(i).unwrap())))
            .collect()
    }

    fn config(batch_size: usize) -> PipelineConfig {
        PipelineConfig::builder()
            .ingest(IngestConfig::new(batch_size, Duration::ZERO).unwrap())
            .base_time(Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap())
            .metadata("crack-meter-1")
            .build()
    }

    #[test]
    fn test_transition_table() {
        use PipelineState::{Completed, Failed, Idle, Pausing, Provisioning, Writing};
        assert!(Idle.can_transition_to(&Provisioning));
        assert!(Provisioning.can_transition_to(&Writing { batch_number: 1 }));
        assert!(Writing { batch_number: 1 }.can_transition_to(&Pausing { after_batch: 1 }));
        assert!(Pausing { after_batch: 1 }.can_transition_to(&Writing { batch_number: 2 }));
        assert!(Writing { batch_number: 2 }.can_transition_to(&Completed));
        assert!(Provisioning.can_transition_to(&Failed));
        assert!(!Idle.can_transition_to(&Writing { batch_number: 1 }));
        assert!(!Completed.can_transition_to(&Failed));
        assert!(!Failed.can_transition_to(&Provisioning));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_run_visits_states_in_order() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(config(2));

        let report = pipeline.run(&store, &raw(5)).await.unwrap();

        assert_eq!(report.ingest.batches_committed(), 3);
        assert_eq!(report.records_total, 5);
        assert!(report.created_collection);
        assert_eq!(
            pipeline.history(),
            &[
                PipelineState::Idle,
                PipelineState::Provisioning,
                PipelineState::Writing { batch_number: 1 },
                PipelineState::Pausing { after_batch: 1 },
                PipelineState::Writing { batch_number: 2 },
                PipelineState::Pausing { after_batch: 2 },
                PipelineState::Writing { batch_number: 3 },
                PipelineState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_records_are_calibrated_and_stamped() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(config(10));
        let report = pipeline.run(&store, &raw(3)).await.unwrap();

        let stored = store.find_all(&report.collection).await.unwrap();
        let base = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2].timestamp(), base + TimeDelta::seconds(2));
        assert_eq!(stored[0].metadata(), Some("crack-meter-1"));
        let expected = 101.97 + 0.0283 * 1000.0;
        assert!((stored[0].set_current_ma().unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_input_completes_without_writes() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(config(10));
        let report = pipeline.run(&store, &[]).await.unwrap();

        assert_eq!(report.ingest.batches_committed(), 0);
        assert_eq!(pipeline.state(), PipelineState::Completed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(config(10));
        pipeline.run(&store, &raw(1)).await.unwrap();

        let err = pipeline.run(&store, &raw(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_terminal() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(PipelineConfig::builder().collection("bad/name").build());

        assert!(pipeline.run(&store, &raw(1)).await.is_err());
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_connection_failure_writes_nothing() {
        let mut pipeline = Pipeline::new(config(10));
        let connect = async {
            Err::<MemoryStore, _>(Error::Connection {
                target: "localhost:27017".to_string(),
                reason: "connection refused".to_string(),
            })
        };

        let err = pipeline.run_scoped(connect, &raw(3)).await.unwrap_err();

        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(
            pipeline.history(),
            &[PipelineState::Idle, PipelineState::Provisioning, PipelineState::Failed]
        );
    }

    #[tokio::test]
    async fn test_resume_offset_beyond_input() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(PipelineConfig::builder().resume_offset(4).build());

        let err = pipeline.run(&store, &raw(3)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }
}
