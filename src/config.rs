//! Execution configuration and the per-statement metadata bag.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::value::ValuePolicy;

pub const DEFAULT_BULK_COPY_SIZE: usize = 50_000;
pub const DEFAULT_BULK_RETRIES: usize = 3;
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Context-wide settings.
///
/// ```rust
/// use dualsql::config::ExecutionConfig;
/// use dualsql::value::ValuePolicy;
///
/// let config = ExecutionConfig::from_toml_str(r#"
///     default_timeout_secs = 120
///     auto_create_tables = true
///     value_policy = "relaxed"
///
///     [bulk]
///     batch_size = 1000
/// "#).unwrap();
///
/// assert_eq!(config.default_timeout_secs, 120);
/// assert_eq!(config.value_policy, ValuePolicy::Relaxed);
/// assert_eq!(config.bulk.batch_size, 1000);
/// assert_eq!(config.bulk.retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Command timeout used when a statement does not set its own
    pub default_timeout_secs: u64,
    /// Synthesize missing virtual tables instead of failing
    pub auto_create_tables: bool,
    /// Handling of property types without a SQL mapping
    pub value_policy: ValuePolicy,
    pub bulk: BulkOptions,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            auto_create_tables: false,
            value_policy: ValuePolicy::Strict,
            bulk: BulkOptions::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn from_toml_str(text: &str) -> DbResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Batch size, retry cap and per-batch timeout of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    pub batch_size: usize,
    pub retries: usize,
    pub timeout_secs: u64,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BULK_COPY_SIZE,
            retries: DEFAULT_BULK_RETRIES,
            timeout_secs: DEFAULT_BULK_TIMEOUT_SECS,
        }
    }
}

impl BulkOptions {
    pub fn new(batch_size: usize, retries: usize, timeout_secs: u64) -> Self {
        Self {
            batch_size,
            retries,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.batch_size == 0 {
            return Err(DbError::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(DbError::InvalidArgument(
                "retry cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-statement switches. Each flag independently toggles a dispatcher
/// branch; keys use the PascalCase names of the metadata bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StatementMetadata {
    pub use_bulk_copy: bool,
    pub use_temp_table: bool,
    pub use_min_temp_table: bool,
    /// Temp table name template; `*` is replaced by a unique token
    pub temp_table_name: Option<String>,
    pub bulk_copy_size: Option<usize>,
    pub timeout_in_seconds: Option<u64>,
}

impl StatementMetadata {
    pub fn from_json(value: serde_json::Value) -> DbResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_toml_str(text: &str) -> DbResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn wants_temp_table(&self) -> bool {
        self.use_temp_table || self.use_min_temp_table
    }

    pub fn bulk_copy_size(&self) -> usize {
        self.bulk_copy_size.unwrap_or(DEFAULT_BULK_COPY_SIZE)
    }

    /// Statement timeout, else the context default.
    pub fn timeout(&self, config: &ExecutionConfig) -> Duration {
        self.timeout_in_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.default_timeout())
    }
}
