//! Raw Record - one row of the instrument export

use serde::{Deserialize, Serialize};

/// One uncalibrated row as exported by the crack-meter.
///
/// Current and voltage cells may be empty in the export; an empty cell is
/// `None`, which is distinct from a reading of `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Excitation frequency in kHz
    pub frequency_khz: f64,
    /// Set-point current, raw ADC units
    pub set_current_raw: Option<f64>,
    /// Measured current, raw ADC units
    pub current_raw: Option<f64>,
    /// Voltage drop, raw 16-bit ADC code
    pub voltage_drop_raw: Option<f64>,
    /// Crack size in mm
    pub crack_size_mm: f64,
}

impl RawRecord {
    /// Create a raw record with every reading present.
    #[must_use]
    pub const fn new(
        frequency_khz: f64,
        set_current_raw: f64,
        current_raw: f64,
        voltage_drop_raw: f64,
        crack_size_mm: f64,
    ) -> Self {
        Self {
            frequency_khz,
            set_current_raw: Some(set_current_raw),
            current_raw: Some(current_raw),
            voltage_drop_raw: Some(voltage_drop_raw),
            crack_size_mm,
        }
    }
}
