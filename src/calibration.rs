//! Crack-meter calibration
//!
//! Converts raw ADC readings into physical units.
//!
//! ## Current (mA)
//!
//! Piecewise fit of the sensor's current response:
//!
//! | Raw code            | Regime      | Formula                     |
//! |---------------------|-------------|-----------------------------|
//! | `raw < 150`         | noise floor | `0`                         |
//! | `150 <= raw <= 2000`| linear      | `101.97 + 0.0283 * raw`     |
//! | `raw > 2000`        | saturation  | `147.48 + 0.0118 * raw`     |
//!
//! The fit is discontinuous at both boundaries; the constants are
//! reproduced as characterized, not re-derived.
//!
//! ## Voltage (mV)
//!
//! Single-ended ADC with a ±2.048 V span over a 16-bit signed code range:
//! `mV = raw * (2.048 / (65535 / 2)) * 1000`.

use crate::record::{CalibratedReading, RawRecord};

/// Raw codes below this are sensor noise.
pub const NOISE_FLOOR: f64 = 150.0;

/// Raw codes above this are in the saturation regime.
pub const SATURATION_THRESHOLD: f64 = 2000.0;

/// Linear regime: mA = `LINEAR_OFFSET_MA` + `LINEAR_GAIN` * raw
pub const LINEAR_OFFSET_MA: f64 = 101.97;
/// Linear regime gain (mA per raw code)
pub const LINEAR_GAIN: f64 = 0.0283;

/// Saturation regime: mA = `SATURATION_OFFSET_MA` + `SATURATION_GAIN` * raw
pub const SATURATION_OFFSET_MA: f64 = 147.48;
/// Saturation regime gain (mA per raw code)
pub const SATURATION_GAIN: f64 = 0.0118;

/// ADC reference span in volts
pub const ADC_REFERENCE_V: f64 = 2.048;

/// Millivolts per raw ADC code
pub const MV_PER_CODE: f64 = (ADC_REFERENCE_V / (65535.0 / 2.0)) * 1000.0;

/// Calibration regime a raw current code falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentRegime {
    /// Below the noise floor, reported as 0 mA
    NoiseFloor,
    /// Linear operating range (both ends inclusive)
    Linear,
    /// Above the saturation threshold
    Saturation,
}

impl CurrentRegime {
    /// Classify a raw current code.
    #[must_use]
    pub fn of(raw: f64) -> Self {
        if raw < NOISE_FLOOR {
            Self::NoiseFloor
        } else if raw > SATURATION_THRESHOLD {
            Self::Saturation
        } else {
            Self::Linear
        }
    }
}

/// Scale a raw current code to mA.
///
/// `None` in, `None` out.
#[must_use]
pub fn scale_current(raw: Option<f64>) -> Option<f64> {
    raw.map(|raw| match CurrentRegime::of(raw) {
        CurrentRegime::NoiseFloor => 0.0,
        CurrentRegime::Saturation => SATURATION_OFFSET_MA + SATURATION_GAIN * raw,
        CurrentRegime::Linear => LINEAR_OFFSET_MA + LINEAR_GAIN * raw,
    })
}

/// Scale a raw voltage ADC code to mV.
///
/// `None` in, `None` out.
#[must_use]
pub fn scale_voltage(raw: Option<f64>) -> Option<f64> {
    raw.map(|raw| raw * MV_PER_CODE)
}

/// Calibrate every reading of a raw row.
///
/// Frequency and crack size pass through unchanged.
#[must_use]
pub fn calibrate(raw: &RawRecord) -> CalibratedReading {
    CalibratedReading {
        frequency_khz: raw.frequency_khz,
        set_current_ma: scale_current(raw.set_current_raw),
        current_ma: scale_current(raw.current_raw),
        voltage_drop_mv: scale_voltage(raw.voltage_drop_raw),
        crack_size_mm: raw.crack_size_mm,
    }
}

/// Calibrate a whole data set, preserving order.
#[must_use]
pub fn calibrate_all(raw: &[RawRecord]) -> Vec<CalibratedReading> {
    raw.iter().map(calibrate).collect()
}
