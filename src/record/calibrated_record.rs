//! Calibrated Record - physical units plus synthetic time axis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row converted to physical units but not yet placed on a time axis.
///
/// Produced by [`calibrate`](crate::calibration::calibrate), consumed by
/// [`Timestamper::stamp`](crate::timestamp::Timestamper::stamp).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedReading {
    /// Excitation frequency in kHz
    pub frequency_khz: f64,
    /// Set-point current in mA
    pub set_current_ma: Option<f64>,
    /// Measured current in mA
    pub current_ma: Option<f64>,
    /// Voltage drop in mV
    pub voltage_drop_mv: Option<f64>,
    /// Crack size in mm
    pub crack_size_mm: f64,
}

/// Calibrated Record is the unit written to a time-series collection.
///
/// Immutable once created: fields are only reachable through getters.
///
/// ## Stored Layout
///
/// Serializes with the unit-labelled field names used by the collection:
/// `timestamp`, `metadata`, `Frequency [kHz]`, `Set current [mA]`,
/// `Real current [mA]`, `RSM voltage drop [mV]`, `Crack size [mm]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibratedRecord {
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
    #[serde(rename = "Frequency [kHz]")]
    frequency_khz: f64,
    #[serde(rename = "Set current [mA]")]
    set_current_ma: Option<f64>,
    #[serde(rename = "Real current [mA]")]
    current_ma: Option<f64>,
    #[serde(rename = "RSM voltage drop [mV]")]
    voltage_drop_mv: Option<f64>,
    #[serde(rename = "Crack size [mm]")]
    crack_size_mm: f64,
}

impl CalibratedRecord {
    /// Place a calibrated reading at `timestamp`.
    ///
    /// # Arguments
    ///
    /// * `reading` - Calibrated values
    /// * `timestamp` - Position on the collection's time axis
    /// * `metadata` - Optional sensor/session identifier
    #[must_use]
    pub const fn new(
        reading: CalibratedReading,
        timestamp: DateTime<Utc>,
        metadata: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            metadata,
            frequency_khz: reading.frequency_khz,
            set_current_ma: reading.set_current_ma,
            current_ma: reading.current_ma,
            voltage_drop_mv: reading.voltage_drop_mv,
            crack_size_mm: reading.crack_size_mm,
        }
    }

    /// Get the timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get the sensor/session identifier, if set.
    #[must_use]
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// Get the frequency in kHz.
    #[must_use]
    pub const fn frequency_khz(&self) -> f64 {
        self.frequency_khz
    }

    /// Get the set-point current in mA.
    #[must_use]
    pub const fn set_current_ma(&self) -> Option<f64> {
        self.set_current_ma
    }

    /// Get the measured current in mA.
    #[must_use]
    pub const fn current_ma(&self) -> Option<f64> {
        self.current_ma
    }

    /// Get the voltage drop in mV.
    #[must_use]
    pub const fn voltage_drop_mv(&self) -> Option<f64> {
        self.voltage_drop_mv
    }

    /// Get the crack size in mm.
    #[must_use]
    pub const fn crack_size_mm(&self) -> f64 {
        self.crack_size_mm
    }

    /// The calibrated values without time axis or metadata.
    #[must_use]
    pub const fn reading(&self) -> CalibratedReading {
        CalibratedReading {
            frequency_khz: self.frequency_khz,
            set_current_ma: self.set_current_ma,
            current_ma: self.current_ma,
            voltage_drop_mv: self.voltage_drop_mv,
            crack_size_mm: self.crack_size_mm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading() -> CalibratedReading {
        CalibratedReading {
            frequency_khz: 30.0,
            set_current_ma: Some(116.12),
            current_ma: None,
            voltage_drop_mv: Some(62.5),
            crack_size_mm: 1.5,
        }
    }

    #[test]
    fn test_calibrated_record_accessors() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let record = CalibratedRecord::new(reading(), ts, Some("sensor-7".to_string()));

        assert_eq!(record.timestamp(), ts);
        assert_eq!(record.metadata(), Some("sensor-7"));
        assert_eq!(record.current_ma(), None);
        assert_eq!(record.reading(), reading());
    }

    #[test]
    fn test_calibrated_record_uses_unit_labels() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let record = CalibratedRecord::new(reading(), ts, None);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("Real current [mA]").is_some());
        assert!(json.get("RSM voltage drop [mV]").is_some());
        assert!(json.get("metadata").is_none());

        let back: CalibratedRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
