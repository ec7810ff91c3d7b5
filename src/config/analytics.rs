//! Cost analytics source configuration.
//!
//! ```toml
//! [analytics]
//! base_url = "https://cost-analytics.internal"
//! timeout_secs = 30
//!
//! [analytics.retry]
//! max_retries = 3
//! initial_delay_ms = 200
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Connection settings for the HTTP cost analytics source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Base URL of the cost analytics API. Required by the HTTP source; may be
    /// omitted when a different [`crate::analytics::CostSource`] is wired in.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bearer token used by the static session provider for local runs.
    /// Supports `${VAR}` expansion like any other value.
    #[serde(default)]
    pub session_token: Option<String>,

    /// Currency the source reports amounts in.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Retry behaviour for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
            session_token: None,
            currency: default_currency(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "analytics.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "analytics.timeout_secs must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Validation(
                "analytics.retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Retry configuration for analytics requests.
///
/// Retries use exponential backoff and only fire on status codes that
/// indicate temporary issues (429, 5xx) or on connection failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether retries are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of retry attempts (not including the initial request).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random jitter applied to delays (fraction, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Status codes that should trigger a retry.
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.enabled && self.retryable_status_codes.contains(&status)
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base_delay =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        std::time::Duration::from_millis(final_delay as u64)
    }

    /// Retry settings that never wait, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
