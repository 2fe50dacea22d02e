//! Instrument export loader
//!
//! Parses the crack-meter's semicolon-delimited export into [`RawRecord`]s
//! using the Arrow CSV reader.
//!
//! ```text
//! Frequency;CurrentSet;Current;Voltage Drop;Crack size
//! 30;1200;1187;;0.0
//! 30;1250;1240;4312;0.5
//! ```
//!
//! Empty current/voltage cells load as `None`, as do the usual spreadsheet
//! missing-value markers (`NaN`, `nan`, `NA`, `N/A`, `null`, `None`, ...).
//! Anything else that does not parse fails the whole load before
//! calibration:
//!
//! - text or infinities in a numeric column
//! - a missing required column
//! - an empty frequency or crack-size cell
//! - input that is not UTF-8
//!
//! Cells are taken verbatim: a number padded with spaces (`30; 1000`) is
//! not a number.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float64Array};
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use regex::Regex;
use tracing::{debug, info};

use crate::record::{
    RawRecord, COLUMN_CRACK_SIZE, COLUMN_CURRENT, COLUMN_FREQUENCY, COLUMN_SET_CURRENT,
    COLUMN_VOLTAGE_DROP, INPUT_COLUMNS,
};
use crate::{Error, Result};

/// Field delimiter of the instrument export.
pub const DELIMITER: u8 = b';';

/// Rows decoded per Arrow batch while loading.
const LOAD_BATCH_ROWS: usize = 1024;

/// Cells read as "no value": empty, plus the missing-value markers
/// spreadsheet and pandas exports write.
const MISSING_VALUE_PATTERN: &str = r"^(|#N/A|#N/A N/A|#NA|-1\.#IND|-1\.#QNAN|-NaN|-nan|1\.#IND|1\.#QNAN|<NA>|N/A|NA|NULL|NaN|None|n/a|nan|null)$";

/// Load an export file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, or
/// [`Error::ParseError`] if its contents violate the input format.
pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    info!(path = %path.display(), "Reading crack-meter export");
    let file = std::fs::File::open(path)?;
    let records = load_reader(file)?;
    info!(path = %path.display(), rows = records.len(), "Export read successfully");
    Ok(records)
}

/// Load an export from any reader.
///
/// # Errors
///
/// Returns [`Error::Io`] if reading fails, or [`Error::ParseError`] if the
/// input is not UTF-8 or violates the export format.
pub fn load_reader<R: Read>(mut reader: R) -> Result<Vec<RawRecord>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let content = String::from_utf8(bytes)
        .map_err(|e| Error::ParseError(format!("input is not valid UTF-8: {e}")))?;
    load_str(&content)
}

/// Load an export held in memory.
///
/// # Errors
///
/// Returns [`Error::ParseError`] if the input violates the export format.
pub fn load_str(content: &str) -> Result<Vec<RawRecord>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let header = content
        .lines()
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::ParseError("input is empty, expected a header row".to_string()))?;

    let columns = header_columns(header);
    let projection = project_required(&columns)?;
    let schema = input_schema(&columns);
    let missing = Regex::new(MISSING_VALUE_PATTERN)
        .map_err(|e| Error::Other(format!("missing-value pattern: {e}")))?;

    let reader = ReaderBuilder::new(schema)
        .with_header(true)
        .with_delimiter(DELIMITER)
        .with_null_regex(missing)
        .with_batch_size(LOAD_BATCH_ROWS)
        .with_projection(projection)
        .build(Cursor::new(content.as_bytes()))
        .map_err(|e| Error::ParseError(format!("cannot read input: {e}")))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| {
            Error::ParseError(format!(
                "malformed row after data row {}: {e}",
                records.len()
            ))
        })?;
        decode_batch(&batch, records.len(), &mut records)?;
    }

    debug!(rows = records.len(), "Decoded export rows");
    Ok(records)
}

fn header_columns(header: &str) -> Vec<String> {
    header
        .split(char::from(DELIMITER))
        .map(|name| name.trim().trim_matches('"').to_string())
        .collect()
}

/// Indices of the required columns in export order.
fn project_required(columns: &[String]) -> Result<Vec<usize>> {
    let missing: Vec<&str> = INPUT_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect();

    if !missing.is_empty() {
        return Err(Error::ParseError(format!(
            "unrecognized input schema: missing column(s) {}; expected {}",
            missing.join(", "),
            INPUT_COLUMNS.join(";")
        )));
    }

    let mut projection: Vec<usize> = INPUT_COLUMNS
        .iter()
        .filter_map(|required| columns.iter().position(|c| c == required))
        .collect();
    projection.sort_unstable();
    Ok(projection)
}

/// Required columns are nullable floats; unknown columns are read as text
/// and projected away.
fn input_schema(columns: &[String]) -> Arc<Schema> {
    let fields: Vec<Field> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let data_type = if INPUT_COLUMNS.contains(&name.as_str()) {
                DataType::Float64
            } else {
                DataType::Utf8
            };
            // Arrow requires unique field names; blank or repeated extras get positional names
            let field_name = if name.is_empty() || columns[..i].contains(name) {
                format!("__column_{i}")
            } else {
                name.clone()
            };
            Field::new(field_name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| Error::ParseError(format!("column '{name}' is not numeric")))
}

/// Value of a cell; `None` when absent, an error when not finite.
fn cell(array: &Float64Array, row: usize, column: &str, line: usize) -> Result<Option<f64>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let value = array.value(row);
    if !value.is_finite() {
        return Err(Error::ParseError(format!(
            "data row {line}: '{column}' holds {value}, expected a finite number"
        )));
    }
    Ok(Some(value))
}

fn decode_batch(batch: &RecordBatch, first_row: usize, out: &mut Vec<RawRecord>) -> Result<()> {
    let frequency = float_column(batch, COLUMN_FREQUENCY)?;
    let set_current = float_column(batch, COLUMN_SET_CURRENT)?;
    let current = float_column(batch, COLUMN_CURRENT)?;
    let voltage = float_column(batch, COLUMN_VOLTAGE_DROP)?;
    let crack = float_column(batch, COLUMN_CRACK_SIZE)?;

    for row in 0..batch.num_rows() {
        // 1-based data row, header excluded
        let line = first_row + row + 1;
        let optional = |array: &Float64Array, column: &str| cell(array, row, column, line);
        let required = |array: &Float64Array, column: &str| {
            optional(array, column)?.ok_or_else(|| {
                Error::ParseError(format!("data row {line}: '{column}' is empty"))
            })
        };
        out.push(RawRecord {
            frequency_khz: required(frequency, COLUMN_FREQUENCY)?,
            set_current_raw: optional(set_current, COLUMN_SET_CURRENT)?,
            current_raw: optional(current, COLUMN_CURRENT)?,
            voltage_drop_raw: optional(voltage, COLUMN_VOLTAGE_DROP)?,
            crack_size_mm: required(crack, COLUMN_CRACK_SIZE)?,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n\
                          30;1200;1187;;0.0\n\
                          30;1250;1240;4312;0.5\n";

    #[test]
    fn test_load_rows_in_order() {
        let records = load_str(EXPORT).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].voltage_drop_raw, None);
        assert_eq!(records[1].voltage_drop_raw, Some(4312.0));
        assert!((records[1].crack_size_mm - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_is_not_absent() {
        let records = load_str("Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30;0;;0;1\n")
            .unwrap();
        assert_eq!(records[0].set_current_raw, Some(0.0));
        assert_eq!(records[0].current_raw, None);
        assert_eq!(records[0].voltage_drop_raw, Some(0.0));
    }

    #[test]
    fn test_reordered_and_extra_columns() {
        let input = "Crack size;Note;Voltage Drop;Current;CurrentSet;Frequency\n1.5;ok;100;200;300;40\n";
        let records = load_str(input).unwrap();
        assert_eq!(
            records[0],
            RawRecord::new(40.0, 300.0, 200.0, 100.0, 1.5)
        );
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let err = load_str("Frequency;Current;Crack size\n30;100;1\n").unwrap_err();
        match err {
            Error::ParseError(msg) => {
                assert!(msg.contains("unrecognized input schema"));
                assert!(msg.contains("CurrentSet"));
                assert!(msg.contains("Voltage Drop"));
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_cell_fails_fast() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30;abc;1;1;1\n";
        assert!(matches!(load_str(input), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_empty_required_cell_fails() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30;1;1;1;1\n;1;1;1;1\n";
        match load_str(input).unwrap_err() {
            Error::ParseError(msg) => assert!(msg.contains("data row 2")),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(load_str(""), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_header_only_is_empty_set() {
        let records = load_str("Frequency;CurrentSet;Current;Voltage Drop;Crack size\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_value_markers_load_as_absent() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n\
                     30;NaN;NA;null;0.5\n\
                     30;nan;N/A;None;0.6\n";
        let records = load_str(input).unwrap();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.set_current_raw, None);
            assert_eq!(record.current_raw, None);
            assert_eq!(record.voltage_drop_raw, None);
        }
    }

    #[test]
    fn test_missing_marker_in_required_column_fails() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\nNaN;1;1;1;1\n";
        match load_str(input).unwrap_err() {
            Error::ParseError(msg) => assert!(msg.contains("'Frequency' is empty")),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_infinite_cell_fails() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30;1;1;1;1\n30;inf;1;1;1\n";
        assert!(matches!(load_str(input), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_non_finite_value_rejected_with_row() {
        let schema = Arc::new(Schema::new(
            INPUT_COLUMNS
                .iter()
                .map(|name| Field::new(*name, DataType::Float64, true))
                .collect::<Vec<_>>(),
        ));
        let column = |values: Vec<Option<f64>>| -> Arc<dyn Array> { Arc::new(Float64Array::from(values)) };
        let batch = RecordBatch::try_new(
            schema,
            vec![
                column(vec![Some(30.0), Some(30.0)]),
                column(vec![Some(1.0), Some(f64::NAN)]),
                column(vec![None, None]),
                column(vec![Some(1.0), Some(1.0)]),
                column(vec![Some(0.5), Some(0.5)]),
            ],
        )
        .unwrap();

        let mut out = Vec::new();
        match decode_batch(&batch, 10, &mut out).unwrap_err() {
            Error::ParseError(msg) => {
                assert!(msg.contains("data row 12"));
                assert!(msg.contains("CurrentSet"));
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let mut input = b"Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30;1;1;1;".to_vec();
        input.extend_from_slice(b"\xb5\n");
        assert!(matches!(
            load_reader(input.as_slice()),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_padded_number_is_parse_error() {
        let input = "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n30; 1000;1;1;1\n";
        assert!(matches!(load_str(input), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let input = format!("\u{feff}{EXPORT}");
        assert_eq!(load_str(&input).unwrap().len(), 2);
    }
}
