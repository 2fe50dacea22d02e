//! # Crackmeter-DB: Crack-Meter Calibration and Time-Series Ingestion
//!
//! Crackmeter-DB turns semicolon-separated crack-meter exports (raw ADC
//! counts) into calibrated physical readings, gives every reading a
//! synthetic timestamp, and writes them to a time-series store in paced
//! bulk inserts.
//!
//! ## Pipeline
//!
//! ```text
//! CSV ─> loader ─> calibration ─> timestamp ─> provision ─> ingest ─> store
//! ```
//!
//! - **Calibration**: piecewise-linear current scaling (noise floor,
//!   linear, saturation) and a fixed ADC scale for voltage drop
//! - **Ingestion**: fixed-size chunks, one all-or-nothing bulk insert each,
//!   with a pause between chunks; a failed chunk stops the run and reports
//!   where to resume
//! - **Stores**: in-memory (Arrow), Parquet directory, MongoDB (feature
//!   `mongodb`)
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use crackmeter_db::loader::load_str;
//! use crackmeter_db::pipeline::{Pipeline, PipelineConfig};
//! use crackmeter_db::store::MemoryStore;
//!
//! # async fn example() -> crackmeter_db::Result<()> {
//! let raw = load_str(
//!     "Frequency;CurrentSet;Current;Voltage Drop;Crack size\n\
//!      30;1000;990;2048;0.41\n",
//! )?;
//!
//! let config = PipelineConfig::builder()
//!     .collection("crack_data")
//!     .base_time(Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap())
//!     .build();
//! let store = MemoryStore::new();
//! let report = Pipeline::new(config).run(&store, &raw).await?;
//! assert_eq!(report.ingest.records_inserted, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod calibration;
pub mod config;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod pipeline;
pub mod provision;
pub mod record;
pub mod store;
pub mod summary;
pub mod timestamp;

pub use error::{Error, Result};
