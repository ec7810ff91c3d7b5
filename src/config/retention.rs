//! Expired-row purge configuration.
//!
//! Raw usage rows and aggregates carry an `expires_at` timestamp. SQL backends
//! do not expire rows on their own, so a background worker deletes them.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! interval_hours = 6
//!
//! [retention.safety]
//! dry_run = false
//! max_deletes_per_run = 100000
//! batch_size = 1000
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Expired-row purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the purge worker runs.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// How often to run the purge (in hours).
    /// Default: 6
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: RetentionSafety,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            safety: RetentionSafety::default(),
        }
    }
}

fn default_interval_hours() -> u64 {
    6
}

/// Safety settings for purge runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// If true, log what would be deleted without actually deleting.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of rows to delete per run per table.
    /// Set to 0 for unlimited.
    /// Default: 100000
    #[serde(default = "default_max_deletes_per_run")]
    pub max_deletes_per_run: u64,

    /// Rows deleted per statement.
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for RetentionSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_deletes_per_run: default_max_deletes_per_run(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_max_deletes_per_run() -> u64 {
    100_000
}

fn default_batch_size() -> u32 {
    1000
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.interval_hours must be at least 1".into(),
            ));
        }
        if self.safety.batch_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours * 3600)
    }

    /// Delete cap for a single run, with 0 meaning unlimited.
    pub fn max_deletes(&self) -> u64 {
        if self.safety.max_deletes_per_run == 0 {
            u64::MAX
        } else {
            self.safety.max_deletes_per_run
        }
    }
}
