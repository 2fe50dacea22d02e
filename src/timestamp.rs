//! Synthetic time axis
//!
//! The instrument export has no time column, but a time-series collection
//! needs one. Record `i` is placed at `base + i * interval`.

use chrono::{DateTime, TimeDelta, Utc};

use crate::record::{CalibratedReading, CalibratedRecord};
use crate::{Error, Result};

/// Default spacing between consecutive records, in seconds.
pub const DEFAULT_INTERVAL_SECS: i64 = 1;

/// Assigns strictly increasing timestamps in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamper {
    base: DateTime<Utc>,
    interval: TimeDelta,
}

impl Timestamper {
    /// Create a timestamper starting at `base` with the default 1 s interval.
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            interval: TimeDelta::seconds(DEFAULT_INTERVAL_SECS),
        }
    }

    /// Create a timestamper with a custom interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `interval` is zero or negative,
    /// since timestamps would no longer be unique.
    pub fn with_interval(base: DateTime<Utc>, interval: TimeDelta) -> Result<Self> {
        if interval <= TimeDelta::zero() {
            return Err(Error::InvalidInput(format!(
                "timestamp interval must be positive, got {interval}"
            )));
        }
        Ok(Self { base, interval })
    }

    /// Timestamp of the first record.
    #[must_use]
    pub const fn base(&self) -> DateTime<Utc> {
        self.base
    }

    /// Spacing between consecutive records.
    #[must_use]
    pub const fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Timestamp of record `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the timestamp overflows the
    /// representable range.
    pub fn at(&self, index: usize) -> Result<DateTime<Utc>> {
        i32::try_from(index)
            .ok()
            .and_then(|i| self.interval.checked_mul(i))
            .and_then(|offset| self.base.checked_add_signed(offset))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "timestamp for record {index} overflows (base {}, interval {})",
                    self.base, self.interval
                ))
            })
    }

    /// Stamp readings in order, attaching the same `metadata` to each.
    ///
    /// Record order is unchanged; `result[i].timestamp() == base + i * interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a timestamp overflows.
    pub fn stamp(
        &self,
        readings: Vec<CalibratedReading>,
        metadata: Option<&str>,
    ) -> Result<Vec<CalibratedRecord>> {
        readings
            .into_iter()
            .enumerate()
            .map(|(i, reading)| {
                Ok(CalibratedRecord::new(
                    reading,
                    self.at(i)?,
                    metadata.map(str::to_string),
                ))
            })
            .collect()
    }
}
