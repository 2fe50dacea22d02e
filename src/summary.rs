//! Descriptive statistics of a calibrated data set
//!
//! Per numeric field: count of present values, mean, sample standard
//! deviation, min and max. Absent readings are skipped, not counted as zero.

use std::fmt;

use serde::Serialize;

use crate::record::{
    CalibratedRecord, FIELD_CRACK_SIZE, FIELD_CURRENT, FIELD_FREQUENCY, FIELD_SET_CURRENT,
    FIELD_VOLTAGE_DROP,
};

/// Statistics of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    /// Stored field name
    pub name: &'static str,
    /// Present values
    pub count: usize,
    /// Arithmetic mean (`None` when empty)
    pub mean: Option<f64>,
    /// Sample standard deviation (`None` below two values)
    pub std: Option<f64>,
    /// Minimum
    pub min: Option<f64>,
    /// Maximum
    pub max: Option<f64>,
}

impl ColumnStats {
    #[allow(clippy::cast_precision_loss)]
    fn from_values(name: &'static str, values: impl Iterator<Item = f64>) -> Self {
        // Welford's online update
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            m2 += delta * (value - mean);
            min = min.min(value);
            max = max.max(value);
        }

        let present = count > 0;
        Self {
            name,
            count,
            mean: present.then_some(mean),
            std: (count > 1).then(|| (m2 / (count - 1) as f64).sqrt()),
            min: present.then_some(min),
            max: present.then_some(max),
        }
    }
}

/// Summary of a calibrated data set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Number of records
    pub rows: usize,
    /// Per-field statistics, in stored field order
    pub columns: Vec<ColumnStats>,
}

impl DatasetSummary {
    /// Summarize `records`.
    #[must_use]
    pub fn of(records: &[CalibratedRecord]) -> Self {
        let required = |name, get: fn(&CalibratedRecord) -> f64| {
            ColumnStats::from_values(name, records.iter().map(get))
        };
        let optional = |name, get: fn(&CalibratedRecord) -> Option<f64>| {
            ColumnStats::from_values(name, records.iter().filter_map(get))
        };

        Self {
            rows: records.len(),
            columns: vec![
                required(FIELD_FREQUENCY, CalibratedRecord::frequency_khz),
                optional(FIELD_SET_CURRENT, CalibratedRecord::set_current_ma),
                optional(FIELD_CURRENT, CalibratedRecord::current_ma),
                optional(FIELD_VOLTAGE_DROP, CalibratedRecord::voltage_drop_mv),
                required(FIELD_CRACK_SIZE, CalibratedRecord::crack_size_mm),
            ],
        }
    }

    /// Statistics of one field by stored name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows: {}", self.rows)?;
        writeln!(
            f,
            "{:<24}{:>8}{:>14}{:>14}{:>14}{:>14}",
            "column", "count", "mean", "std", "min", "max"
        )?;
        for c in &self.columns {
            writeln!(
                f,
                "{:<24}{:>8}{:>14}{:>14}{:>14}{:>14}",
                c.name,
                c.count,
                cell(c.mean),
                cell(c.std),
                cell(c.min),
                cell(c.max)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CalibratedReading;
    use chrono::Utc;

    fn record(current: Option<f64>, crack: f64) -> CalibratedRecord {
        let reading = CalibratedReading {
            frequency_khz: 30.0,
            set_current_ma: None,
            current_ma: current,
            voltage_drop_mv: None,
            crack_size_mm: crack,
        };
        CalibratedRecord::new(reading, Utc::now(), None)
    }

    #[test]
    fn test_summary_skips_absent_values() {
        let records = vec![
            record(Some(2.0), 1.0),
            record(None, 2.0),
            record(Some(4.0), 3.0),
        ];
        let summary = DatasetSummary::of(&records);

        assert_eq!(summary.rows, 3);
        let current = summary.column(FIELD_CURRENT).unwrap();
        assert_eq!(current.count, 2);
        assert_eq!(current.mean, Some(3.0));
        assert_eq!(current.min, Some(2.0));
        assert_eq!(current.max, Some(4.0));

        let crack = summary.column(FIELD_CRACK_SIZE).unwrap();
        assert_eq!(crack.count, 3);
        assert!((crack.std.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_absent_column() {
        let summary = DatasetSummary::of(&[record(None, 1.0)]);
        let set = summary.column(FIELD_SET_CURRENT).unwrap();
        assert_eq!(set.count, 0);
        assert_eq!(set.mean, None);
        assert_eq!(set.std, None);
    }

    #[test]
    fn test_display_lists_every_column() {
        let text = DatasetSummary::of(&[record(Some(1.0), 1.0)]).to_string();
        assert!(text.starts_with("Rows: 1"));
        for name in [FIELD_FREQUENCY, FIELD_CURRENT, FIELD_CRACK_SIZE] {
            assert!(text.contains(name));
        }
    }
}
