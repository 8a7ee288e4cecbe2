//! Configuration via `tally.toml`
//!
//! A single TOML document configures the transaction retry policy and the
//! defaults used when building handles. Every section is optional; missing
//! keys take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{TallyError, TallyResult};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tally.toml";

/// Retry policy of the transaction executor
///
/// Only optimistic conflicts are retried. Delays grow exponentially from
/// `base_delay_ms` and are capped at `max_delay_ms`.
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::default().with_max_retries(200).with_max_delay_ms(50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay_ms: 1,
            max_delay_ms: 50,
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.min(63);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    fn validate(&self) -> TallyResult<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(TallyError::invalid_configuration(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Defaults for counter handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Number of shards per counter
    pub num_shards: u32,
    /// Maintain Year/Month/Day/Hour rollups
    pub date_hierarchy: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            num_shards: 10,
            date_hierarchy: false,
        }
    }
}

/// Defaults for coder handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoderConfig {
    /// Number of shards per coder, roughly 100x the expected callers per second
    pub num_shards: u32,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self { num_shards: 100 }
    }
}

/// Administrative operation limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Upper bound on batched delete rounds before giving up
    pub max_delete_rounds: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            max_delete_rounds: 256,
        }
    }
}

/// Top-level configuration loaded from `tally.toml`
///
/// # Example
///
/// ```toml
/// [retry]
/// max_retries = 8
///
/// [counter]
/// num_shards = 10
/// date_hierarchy = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Transaction retry policy
    pub retry: RetryConfig,
    /// Counter defaults
    pub counter: CounterConfig,
    /// Coder defaults
    pub coder: CoderConfig,
    /// Administrative limits
    pub admin: AdminConfig,
}

impl TallyConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> TallyResult<Self> {
        let config: TallyConfig = toml::from_str(content).map_err(|e| {
            TallyError::invalid_configuration(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file
    pub fn from_file(path: &Path) -> TallyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TallyError::invalid_configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check all values are usable
    pub fn validate(&self) -> TallyResult<()> {
        self.retry.validate()?;
        if self.counter.num_shards == 0 {
            return Err(TallyError::invalid_configuration(
                "counter.num_shards must be at least 1",
            ));
        }
        if self.coder.num_shards == 0 {
            return Err(TallyError::invalid_configuration(
                "coder.num_shards must be at least 1",
            ));
        }
        if self.admin.max_delete_rounds == 0 {
            return Err(TallyError::invalid_configuration(
                "admin.max_delete_rounds must be at least 1",
            ));
        }
        Ok(())
    }

    /// The default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Tally configuration

[retry]
# Optimistic conflicts are retried with capped exponential backoff
max_retries = 8
base_delay_ms = 1
max_delay_ms = 50

[counter]
num_shards = 10
# Maintain Year/Month/Day/Hour rollups alongside the total
date_hierarchy = false

[coder]
# Roughly 100x the expected concurrent callers per second
num_shards = 100

[admin]
max_delete_rounds = 256
"#
    }
}
