//! Store and ingestion configuration
//!
//! Store location comes from the environment:
//!
//! | Variable              | Default          |
//! |-----------------------|------------------|
//! | `MONGO_HOST`          | `localhost`      |
//! | `MONGO_PORT`          | `27017`          |
//! | `MONGO_DB`            | `crack_meter-db` |
//! | `CRACKMETER_DATA_DIR` | `./data`         |
//!
//! Ingestion defaults: 100 records per batch, 0.1 s between batches.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ingest::Pacing;
use crate::{Error, Result};

/// Environment variable for the store host
pub const ENV_HOST: &str = "MONGO_HOST";
/// Environment variable for the store port
pub const ENV_PORT: &str = "MONGO_PORT";
/// Environment variable for the database name
pub const ENV_DATABASE: &str = "MONGO_DB";
/// Environment variable for the Parquet store root
pub const ENV_DATA_DIR: &str = "CRACKMETER_DATA_DIR";

/// Default store host
pub const DEFAULT_HOST: &str = "localhost";
/// Default store port
pub const DEFAULT_PORT: u16 = 27017;
/// Default database name
pub const DEFAULT_DATABASE: &str = "crack_meter-db";
/// Default Parquet store root
pub const DEFAULT_DATA_DIR: &str = "./data";
/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default records per bulk insert
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default pause between bulk inserts
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);
/// Default collection name
pub const DEFAULT_COLLECTION: &str = "crack_data";

/// Where the time-series store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Root directory of the Parquet store
    pub data_dir: PathBuf,
    /// Connection / server-selection timeout
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Read the process environment, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `MONGO_PORT` is not a port number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the port is not a port number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get(ENV_PORT) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::InvalidInput(format!("{ENV_PORT}='{raw}' is not a valid port"))
            })?,
            None => defaults.port,
        };

        Ok(Self {
            host: get(ENV_HOST).unwrap_or(defaults.host),
            port,
            database: get(ENV_DATABASE).unwrap_or(defaults.database),
            data_dir: get(ENV_DATA_DIR).map_or(defaults.data_dir, PathBuf::from),
            connect_timeout: defaults.connect_timeout,
        })
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection URI, e.g. `mongodb://localhost:27017/`
    #[must_use]
    pub fn uri(&self) -> String {
        format!("mongodb://{}/", self.address())
    }
}

/// Batch sizing and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Records per bulk insert (> 0)
    pub batch_size: usize,
    /// Pause policy between bulk inserts
    pub pacing: Pacing,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing: Pacing::FixedDelay(DEFAULT_BATCH_DELAY),
        }
    }
}

impl IngestConfig {
    /// Create a config with a fixed delay between batches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `batch_size` is zero.
    pub fn new(batch_size: usize, delay: Duration) -> Result<Self> {
        let config = Self {
            batch_size,
            pacing: Pacing::FixedDelay(delay),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `batch_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a delay given in (fractional) seconds.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for negative, NaN or infinite values.
pub fn delay_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::InvalidInput(format!("delay of {secs}s is not usable: {e}")))
}
