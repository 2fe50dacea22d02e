//! Crack-meter record schema
//!
//! ## Lifecycle
//!
//! ```text
//! RawRecord ──calibrate──> CalibratedReading ──stamp──> CalibratedRecord ──encode──> RecordBatch
//! (CSV row)                (mA / mV)                    (+ timestamp, metadata)     (store write)
//! ```
//!
//! `RawRecord` lives only while the input is loaded. `CalibratedRecord` is
//! immutable once stamped and is dropped after it has been persisted.
//!
//! Persisted field names carry their physical unit, e.g. `Real current [mA]`.

mod batch;
mod calibrated_record;
mod raw_record;

pub use batch::{record_schema, records_from_batch, records_to_batch};
pub use calibrated_record::{CalibratedReading, CalibratedRecord};
pub use raw_record::RawRecord;

/// Input column: excitation frequency
pub const COLUMN_FREQUENCY: &str = "Frequency";
/// Input column: raw set-point current
pub const COLUMN_SET_CURRENT: &str = "CurrentSet";
/// Input column: raw measured current
pub const COLUMN_CURRENT: &str = "Current";
/// Input column: raw voltage drop ADC code
pub const COLUMN_VOLTAGE_DROP: &str = "Voltage Drop";
/// Input column: crack size
pub const COLUMN_CRACK_SIZE: &str = "Crack size";

/// Every column the instrument export must carry, in export order.
pub const INPUT_COLUMNS: [&str; 5] = [
    COLUMN_FREQUENCY,
    COLUMN_SET_CURRENT,
    COLUMN_CURRENT,
    COLUMN_VOLTAGE_DROP,
    COLUMN_CRACK_SIZE,
];

/// Stored field: time axis of the time-series collection
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Stored field: sensor/session grouping key
pub const FIELD_METADATA: &str = "metadata";
/// Stored field: frequency in kHz
pub const FIELD_FREQUENCY: &str = "Frequency [kHz]";
/// Stored field: calibrated set-point current
pub const FIELD_SET_CURRENT: &str = "Set current [mA]";
/// Stored field: calibrated measured current
pub const FIELD_CURRENT: &str = "Real current [mA]";
/// Stored field: calibrated voltage drop across the sensor
pub const FIELD_VOLTAGE_DROP: &str = "RSM voltage drop [mV]";
/// Stored field: crack size in mm
pub const FIELD_CRACK_SIZE: &str = "Crack size [mm]";
