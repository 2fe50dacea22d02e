//! Error types for crackmeter-db
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Crackmeter-db error types
///
/// A collection that already exists is not represented here: provisioning
/// reports it as [`Provisioned::AlreadyExists`](crate::store::Provisioned).
#[derive(Error, Debug)]
pub enum Error {
    /// Store unreachable or handshake timed out (fatal, nothing was written)
    #[error("Cannot reach store at {target}: {reason}\nCheck that the store is running and reachable before retrying")]
    Connection {
        /// Host/port or directory the connection was attempted against
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// A bulk insert was rejected; earlier batches stay committed
    #[error("Write failed for batch {batch_number} (records {first_record}-{last_record}): {source}\n{batches_committed} batch(es) committed before the failure; resume from record offset {resume_offset}")]
    Write {
        /// 1-based number of the failing batch
        batch_number: usize,
        /// 1-based index of the first record in the failing batch
        first_record: usize,
        /// 1-based index of the last record in the failing batch
        last_record: usize,
        /// Batches persisted before the failure
        batches_committed: usize,
        /// Record offset to pass to a resumed run
        resume_offset: usize,
        /// Store error that rejected the batch
        #[source]
        source: Box<Error>,
    },

    /// Ingestion stopped at a chunk boundary on request
    #[error("Ingestion cancelled after {batches_committed} batch(es)\nResume from record offset {resume_offset}")]
    Cancelled {
        /// Batches persisted before cancellation
        batches_committed: usize,
        /// Record offset to pass to a resumed run
        resume_offset: usize,
    },

    /// Malformed input (unparseable cell, unrecognized column set)
    #[error("Input parse error: {0}")]
    ParseError(String),

    /// Invalid argument or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store-level failure (rejected write, corrupt collection)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Collection metadata (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Number of batches committed before this error ended the run.
    ///
    /// Errors raised before any write (connection, parse, provisioning)
    /// report zero.
    #[must_use]
    pub const fn batches_committed(&self) -> usize {
        match self {
            Self::Write {
                batches_committed, ..
            }
            | Self::Cancelled {
                batches_committed, ..
            } => *batches_committed,
            _ => 0,
        }
    }

    /// Record offset a resumed run should start from, if the error carries one.
    #[must_use]
    pub const fn resume_offset(&self) -> Option<usize> {
        match self {
            Self::Write { resume_offset, .. } | Self::Cancelled { resume_offset, .. } => {
                Some(*resume_offset)
            }
            _ => None,
        }
    }
}
