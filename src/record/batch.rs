//! Arrow encoding of calibrated records
//!
//! A `RecordBatch` is the native write format of the Arrow-backed stores:
//! one batch per bulk insert, one row per record, insertion order preserved.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;

use super::{
    CalibratedReading, CalibratedRecord, FIELD_CRACK_SIZE, FIELD_CURRENT, FIELD_FREQUENCY,
    FIELD_METADATA, FIELD_SET_CURRENT, FIELD_TIMESTAMP, FIELD_VOLTAGE_DROP,
};
use crate::{Error, Result};

/// Arrow schema of a stored calibrated record.
///
/// Timestamps are UTC microseconds; absent readings are nulls.
#[must_use]
pub fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            FIELD_TIMESTAMP,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new(FIELD_METADATA, DataType::Utf8, true),
        Field::new(FIELD_FREQUENCY, DataType::Float64, false),
        Field::new(FIELD_SET_CURRENT, DataType::Float64, true),
        Field::new(FIELD_CURRENT, DataType::Float64, true),
        Field::new(FIELD_VOLTAGE_DROP, DataType::Float64, true),
        Field::new(FIELD_CRACK_SIZE, DataType::Float64, false),
    ]))
}

/// Encode records into a single `RecordBatch`, preserving order.
///
/// # Errors
///
/// Returns error if Arrow rejects the columns (should not happen for
/// records built through this crate).
pub fn records_to_batch(records: &[CalibratedRecord]) -> Result<RecordBatch> {
    let timestamps = TimestampMicrosecondArray::from_iter_values(
        records.iter().map(|r| r.timestamp().timestamp_micros()),
    )
    .with_timezone("UTC");
    let metadata: StringArray = records.iter().map(CalibratedRecord::metadata).collect();
    let frequency = Float64Array::from_iter_values(records.iter().map(CalibratedRecord::frequency_khz));
    let set_current: Float64Array = records.iter().map(CalibratedRecord::set_current_ma).collect();
    let current: Float64Array = records.iter().map(CalibratedRecord::current_ma).collect();
    let voltage: Float64Array = records.iter().map(CalibratedRecord::voltage_drop_mv).collect();
    let crack = Float64Array::from_iter_values(records.iter().map(CalibratedRecord::crack_size_mm));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(timestamps),
        Arc::new(metadata),
        Arc::new(frequency),
        Arc::new(set_current),
        Arc::new(current),
        Arc::new(voltage),
        Arc::new(crack),
    ];

    Ok(RecordBatch::try_new(record_schema(), columns)?)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::StorageError(format!("Stored batch has no usable '{name}' column")))
}

fn optional(array: &Float64Array, row: usize) -> Option<f64> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

/// Decode a stored `RecordBatch` back into records, in row order.
///
/// # Errors
///
/// Returns [`Error::StorageError`] if a column is missing, has the wrong
/// type, or a timestamp is out of range.
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<CalibratedRecord>> {
    let timestamps = column::<TimestampMicrosecondArray>(batch, FIELD_TIMESTAMP)?;
    let metadata = column::<StringArray>(batch, FIELD_METADATA)?;
    let frequency = column::<Float64Array>(batch, FIELD_FREQUENCY)?;
    let set_current = column::<Float64Array>(batch, FIELD_SET_CURRENT)?;
    let current = column::<Float64Array>(batch, FIELD_CURRENT)?;
    let voltage = column::<Float64Array>(batch, FIELD_VOLTAGE_DROP)?;
    let crack = column::<Float64Array>(batch, FIELD_CRACK_SIZE)?;

    (0..batch.num_rows())
        .map(|row| {
            let micros = timestamps.value(row);
            let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                Error::StorageError(format!("Stored timestamp {micros}us is out of range"))
            })?;
            let meta = (!metadata.is_null(row)).then(|| metadata.value(row).to_string());
            let reading = CalibratedReading {
                frequency_khz: frequency.value(row),
                set_current_ma: optional(set_current, row),
                current_ma: optional(current, row),
                voltage_drop_mv: optional(voltage, row),
                crack_size_mm: crack.value(row),
            };
            Ok(CalibratedRecord::new(reading, timestamp, meta))
        })
        .collect()
}
