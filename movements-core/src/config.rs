//! Configuration for the movements ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Movement rules
    pub ledger: LedgerConfig,

    /// Account writer configuration
    pub writers: WriterConfig,

    /// Payment leg retry configuration
    pub retry: RetryConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "movements-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: LedgerConfig::default(),
            writers: WriterConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Movement rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Display offset for `date`/`time` stamps (seconds east of UTC)
    pub display_utc_offset_secs: i32,

    /// Attempts at a fresh reference suffix before giving up
    pub reference_attempts: u32,

    /// Maximum decimal places accepted on an amount
    pub amount_scale: u32,

    /// Largest amount magnitude accepted on a single movement
    pub max_amount: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            display_utc_offset_secs: -5 * 3600, // America/Bogota, no DST
            reference_attempts: 5,
            amount_scale: 2,
            max_amount: Decimal::new(1_000_000_000_000, 0),
        }
    }
}

/// Account writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Number of single-writer actors accounts are hashed onto
    pub shards: usize,

    /// Bounded mailbox capacity per writer
    pub mailbox_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            mailbox_capacity: 1000,
        }
    }
}

/// Payment leg retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Delay cap (milliseconds)
    pub max_delay_ms: u64,

    /// Growth factor between retries
    pub backoff_multiplier: f64,

    /// Relative jitter applied to each delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 50,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/movements"),
            write_buffer_size_mb: 64,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("MOVEMENTS_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(shards) = std::env::var("MOVEMENTS_WRITER_SHARDS") {
            config.writers.shards = shards
                .parse()
                .map_err(|e| crate::Error::Config(format!("MOVEMENTS_WRITER_SHARDS: {}", e)))?;
        }

        if let Ok(offset) = std::env::var("MOVEMENTS_DISPLAY_UTC_OFFSET_SECS") {
            config.ledger.display_utc_offset_secs = offset.parse().map_err(|e| {
                crate::Error::Config(format!("MOVEMENTS_DISPLAY_UTC_OFFSET_SECS: {}", e))
            })?;
        }

        if let Ok(retries) = std::env::var("MOVEMENTS_MAX_RETRIES") {
            config.retry.max_retries = retries
                .parse()
                .map_err(|e| crate::Error::Config(format!("MOVEMENTS_MAX_RETRIES: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.writers.shards == 0 {
            return Err(crate::Error::Config("writers.shards must be at least 1".into()));
        }
        if self.writers.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "writers.mailbox_capacity must be at least 1".into(),
            ));
        }
        if self.ledger.reference_attempts == 0 {
            return Err(crate::Error::Config(
                "ledger.reference_attempts must be at least 1".into(),
            ));
        }
        if self.ledger.max_amount <= Decimal::ZERO {
            return Err(crate::Error::Config(
                "ledger.max_amount must be positive".into(),
            ));
        }
        if self.ledger.display_utc_offset_secs.abs() >= 86_400 {
            return Err(crate::Error::Config(format!(
                "ledger.display_utc_offset_secs out of range: {}",
                self.ledger.display_utc_offset_secs
            )));
        }
        Ok(())
    }
}
