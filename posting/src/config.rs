//! Engine and command-line configuration.
//!
//! This module loads configuration for the posting engine from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `POSTING_COMMIT_WORKERS`: Commit worker tasks (default: `4`)
//! - `POSTING_COMMIT_QUEUE_CAPACITY`: Bounded commit queue size (default: `1024`)
//! - `POSTING_COMMIT_INTERVAL_MS`: Periodic commit interval (default: `1000`)
//! - `POSTING_COMMIT_BATCH_SIZE`: Dirty lists drained per tick (default: `1000`)
//! - `POSTING_CACHE_SOFT_LIMIT`: Cached lists before eviction (default: `100000`)
//! - `POSTING_DATA_DIRECTORY`: Directory holding the store (default: `./data`)
//! - `POSTING_SCHEMA_FILE`: Schema file for the command-line tool (required)
//!
//! # Invariants
//!
//! - Every count is at least 1
//! - `commit_interval` is never zero

use std::path::PathBuf;
use std::time::Duration;

/// Tunables of the engine and its commit pipeline.
///
/// # Post-conditions
///
/// When constructed via `from_env()`, every count is positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of commit worker tasks.
    pub commit_workers: usize,
    /// Capacity of the bounded commit queue.
    pub commit_queue_capacity: usize,
    /// How often the ticker drains the dirty set.
    pub commit_interval: Duration,
    /// Dirty lists drained per tick, and the default `commit_all` batch.
    pub commit_batch_size: usize,
    /// Cached lists above which the ticker evicts clean lists.
    pub cache_soft_limit: usize,
}

/// Configuration of the `posting` command-line tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Directory holding the store's log file.
    pub data_directory: PathBuf,
    /// Schema file in `attribute: type [@index]` form.
    pub schema_file: PathBuf,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_workers: Self::DEFAULT_COMMIT_WORKERS,
            commit_queue_capacity: Self::DEFAULT_COMMIT_QUEUE_CAPACITY,
            commit_interval: Duration::from_millis(Self::DEFAULT_COMMIT_INTERVAL_MS),
            commit_batch_size: Self::DEFAULT_COMMIT_BATCH_SIZE,
            cache_soft_limit: Self::DEFAULT_CACHE_SOFT_LIMIT,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_COMMIT_WORKERS: usize = 4;
    pub const DEFAULT_COMMIT_QUEUE_CAPACITY: usize = 1024;
    pub const DEFAULT_COMMIT_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_COMMIT_BATCH_SIZE: usize = 1000;
    pub const DEFAULT_CACHE_SOFT_LIMIT: usize = 100_000;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let commit_interval_ms = load_positive(
            &lookup,
            "POSTING_COMMIT_INTERVAL_MS",
            Self::DEFAULT_COMMIT_INTERVAL_MS,
        )?;
        Ok(Self {
            commit_workers: load_positive(
                &lookup,
                "POSTING_COMMIT_WORKERS",
                Self::DEFAULT_COMMIT_WORKERS,
            )?,
            commit_queue_capacity: load_positive(
                &lookup,
                "POSTING_COMMIT_QUEUE_CAPACITY",
                Self::DEFAULT_COMMIT_QUEUE_CAPACITY,
            )?,
            commit_interval: Duration::from_millis(commit_interval_ms),
            commit_batch_size: load_positive(
                &lookup,
                "POSTING_COMMIT_BATCH_SIZE",
                Self::DEFAULT_COMMIT_BATCH_SIZE,
            )?,
            cache_soft_limit: load_positive(
                &lookup,
                "POSTING_CACHE_SOFT_LIMIT",
                Self::DEFAULT_CACHE_SOFT_LIMIT,
            )?,
        })
    }
}

impl CliConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `POSTING_SCHEMA_FILE` is not set or is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let schema_file = lookup("POSTING_SCHEMA_FILE")
            .ok_or_else(|| ConfigError::MissingEnvVar("POSTING_SCHEMA_FILE".to_string()))?;
        if schema_file.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "POSTING_SCHEMA_FILE".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let data_directory = lookup("POSTING_DATA_DIRECTORY")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);

        Ok(Self {
            data_directory,
            schema_file: PathBuf::from(schema_file),
        })
    }
}

/// Parse a positive integer variable, falling back to `default` when unset.
fn load_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let Some(value) = lookup(name) else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(n) if n != T::from(0) => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a positive integer"),
        }),
    }
}
