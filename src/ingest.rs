//! Paced batch ingestion
//!
//! Records are split into consecutive chunks of at most `batch_size` and
//! written one bulk insert at a time, with a pause between inserts:
//!
//! ```text
//! [write 1] ─ pause ─ [write 2] ─ pause ─ ... ─ [write N]
//! ```
//!
//! The pause bounds the load put on the store; it is never taken after the
//! last chunk. Writes are strictly sequential: record order is the only
//! time axis the data has.
//!
//! A failed insert stops the run at once. Chunks committed before the
//! failure stay committed, and the error reports the record offset to
//! resume from.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use crate::config::IngestConfig;
use crate::record::CalibratedRecord;
use crate::store::{CollectionHandle, TimeSeriesStore};
use crate::{Error, Result};

/// Pause policy between consecutive bulk inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep a fixed time after every insert but the last
    FixedDelay(Duration),
    /// Start inserts at least this far apart; time spent writing counts
    /// toward the wait
    MinInterval(Duration),
}

impl Pacing {
    /// No pause at all.
    pub const NONE: Self = Self::FixedDelay(Duration::ZERO);

    /// How long to wait after a chunk whose insert started at `started`.
    #[must_use]
    pub fn wait_after(&self, started: Instant, now: Instant) -> Duration {
        match *self {
            Self::FixedDelay(delay) => delay,
            Self::MinInterval(interval) => interval.saturating_sub(now.saturating_duration_since(started)),
        }
    }

    /// Nominal spacing, for logs.
    #[must_use]
    pub const fn nominal(&self) -> Duration {
        match *self {
            Self::FixedDelay(d) | Self::MinInterval(d) => d,
        }
    }
}

/// Cooperative cancellation, checked before each chunk.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that ingestion stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One contiguous chunk of the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    /// 0-based chunk index
    pub index: usize,
    /// Position of the first record in the input
    pub offset: usize,
    /// The records of this chunk
    pub records: &'a [CalibratedRecord],
}

impl Batch<'_> {
    /// Input positions covered by this chunk.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.records.len()
    }
}

/// Split `records` into consecutive chunks of at most `batch_size`.
///
/// Concatenating the chunks in order yields `records` exactly.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `batch_size` is zero.
pub fn partition(records: &[CalibratedRecord], batch_size: usize) -> Result<Vec<Batch<'_>>> {
    if batch_size == 0 {
        return Err(Error::InvalidInput(
            "batch size must be greater than zero".to_string(),
        ));
    }
    Ok(records
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            offset: index * batch_size,
            records: chunk,
        })
        .collect())
}

/// Progress after one committed chunk.
///
/// Record positions are 1-based and count from the start of the original
/// input, including any resumed-past records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based chunk number
    pub batch_number: usize,
    /// Chunks in this run
    pub total_batches: usize,
    /// First record written by this chunk
    pub first_record: usize,
    /// Last record written by this chunk
    pub last_record: usize,
    /// Documents the store reported as inserted
    pub inserted: usize,
}

/// Observable ingestion events, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// A bulk insert is about to be issued
    Writing {
        /// 1-based chunk number
        batch_number: usize,
        /// Chunks in this run
        total_batches: usize,
    },
    /// A bulk insert succeeded
    Committed(BatchProgress),
    /// Waiting before the next chunk
    Pausing {
        /// Chunk just committed
        after_batch: usize,
        /// Time about to be waited
        wait: Duration,
    },
}

/// Outcome of a completed ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// One entry per committed chunk
    pub batches: Vec<BatchProgress>,
    /// Documents inserted in total
    pub records_inserted: usize,
    /// Pauses taken between chunks
    pub pauses: usize,
}

impl IngestReport {
    /// Number of chunks committed.
    #[must_use]
    pub fn batches_committed(&self) -> usize {
        self.batches.len()
    }
}

/// Writes calibrated records to a collection in paced bulk inserts.
#[derive(Debug, Clone, Default)]
pub struct BatchIngestor {
    config: IngestConfig,
    cancel: Option<CancellationFlag>,
    record_offset: usize,
}

impl BatchIngestor {
    /// Create an ingestor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the config is invalid.
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
            record_offset: 0,
        })
    }

    /// Stop at the next chunk boundary once `flag` is set.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Records preceding the input in the original data set.
    ///
    /// Only shifts reported positions and resume offsets.
    #[must_use]
    pub const fn with_record_offset(mut self, offset: usize) -> Self {
        self.record_offset = offset;
        self
    }

    /// Ingestion config in use.
    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest without observing events.
    ///
    /// # Errors
    ///
    /// See [`ingest_with`](Self::ingest_with).
    pub async fn ingest<S: TimeSeriesStore>(
        &self,
        store: &S,
        collection: &CollectionHandle,
        records: &[CalibratedRecord],
    ) -> Result<IngestReport> {
        self.ingest_with(store, collection, records, |_| {}).await
    }

    /// Ingest, reporting every event to `observer`.
    ///
    /// # Errors
    ///
    /// - [`Error::Write`] if a bulk insert (or its encoding) fails; no
    ///   further chunk is attempted
    /// - [`Error::Cancelled`] if the cancellation flag was set at a chunk
    ///   boundary
    pub async fn ingest_with<S, F>(
        &self,
        store: &S,
        collection: &CollectionHandle,
        records: &[CalibratedRecord],
        mut observer: F,
    ) -> Result<IngestReport>
    where
        S: TimeSeriesStore,
        F: FnMut(&IngestEvent),
    {
        let batches = partition(records, self.config.batch_size)?;
        let total_batches = batches.len();
        let mut report = IngestReport::default();

        info!(
            collection = collection.name(),
            records = records.len(),
            batch_size = self.config.batch_size,
            delay = ?self.config.pacing.nominal(),
            "Starting batch insertion"
        );

        for batch in &batches {
            let resume_offset = self.record_offset + batch.offset;
            if self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled) {
                info!(
                    batches_committed = report.batches_committed(),
                    resume_offset, "Ingestion cancelled"
                );
                return Err(Error::Cancelled {
                    batches_committed: report.batches_committed(),
                    resume_offset,
                });
            }

            let batch_number = batch.index + 1;
            let first_record = resume_offset + 1;
            let last_record = resume_offset + batch.records.len();
            let write_error = |source: Error| {
                error!(
                    batch_number,
                    first_record,
                    last_record,
                    error = %source,
                    "Error inserting batch"
                );
                Error::Write {
                    batch_number,
                    first_record,
                    last_record,
                    batches_committed: batch.index,
                    resume_offset,
                    source: Box::new(source),
                }
            };

            observer(&IngestEvent::Writing {
                batch_number,
                total_batches,
            });
            let started = Instant::now();
            let payload = store.encode(batch.records).map_err(write_error)?;
            let result = store
                .insert_many(collection, payload)
                .await
                .map_err(write_error)?;

            let progress = BatchProgress {
                batch_number,
                total_batches,
                first_record,
                last_record,
                inserted: result.inserted_count(),
            };
            info!(
                "Batch {batch_number}/{total_batches}: Inserted {} records (records {first_record}-{last_record})",
                progress.inserted
            );
            report.records_inserted += progress.inserted;
            observer(&IngestEvent::Committed(progress.clone()));
            report.batches.push(progress);

            if batch_number < total_batches {
                let wait = self.config.pacing.wait_after(started, Instant::now());
                info!(?wait, "Waiting before next batch");
                observer(&IngestEvent::Pausing {
                    after_batch: batch_number,
                    wait,
                });
                report.pauses += 1;
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Ok(report)
    }
}
