//! Producer configuration with defaults, file, and environment overrides.

use std::{collections::BTreeMap, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{BufferError, Result},
    retry::{BackoffStrategy, RetryPolicy},
};

const CONFIG_FILE: &str = "spool.toml";
const ENV_PREFIX: &str = "SPOOL_";

/// Producer configuration.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `SPOOL_` (highest priority)
/// 2. Configuration file (`spool.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The defaults keep the unbounded, immediate retry behaviour; bounding
/// attempts or adding backoff is opt-in.
///
/// # Example
///
/// ```no_run
/// use spool_core::ProducerConfig;
///
/// let config = ProducerConfig::load()?;
/// println!("producing to {}", config.brokers);
/// # Ok::<(), spool_core::BufferError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerConfig {
    // Polling
    /// Timeout of each transport poll in milliseconds.
    ///
    /// Environment variable: `SPOOL_POLL_TIMEOUT_MS`
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    // Retry
    /// Delivery attempts per message before it is abandoned; 0 means
    /// unlimited.
    ///
    /// Environment variable: `SPOOL_MAX_DELIVERY_ATTEMPTS`
    #[serde(default)]
    pub max_delivery_attempts: u32,
    /// Spacing between retries: `immediate`, `fixed`, `linear` or
    /// `exponential`.
    ///
    /// Environment variable: `SPOOL_RETRY_BACKOFF`
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: BackoffStrategy,
    /// Base delay for backoff in milliseconds.
    ///
    /// Environment variable: `SPOOL_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `SPOOL_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `SPOOL_RETRY_JITTER_FACTOR`
    #[serde(default)]
    pub retry_jitter_factor: f64,

    // Transport
    /// Comma-separated bootstrap broker list.
    ///
    /// Environment variable: `SPOOL_BROKERS`
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Extra client properties passed verbatim to the transport.
    #[serde(default)]
    pub client_properties: BTreeMap<String, String>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `SPOOL_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl ProducerConfig {
    /// Loads configuration from defaults, `spool.toml` in the working
    /// directory, and `SPOOL_` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like `load`, reading the configuration file at `path`.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().map_err(|e| {
            BufferError::configuration(format!("failed to load configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            return Err(BufferError::configuration("poll_timeout_ms must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(BufferError::configuration(
                "retry_jitter_factor must be between 0.0 and 1.0",
            ));
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(BufferError::configuration(
                "retry_max_delay_ms cannot be less than retry_base_delay_ms",
            ));
        }

        if self.brokers.trim().is_empty() {
            return Err(BufferError::configuration("brokers must not be empty"));
        }

        Ok(())
    }

    /// Converts to a retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: (self.max_delivery_attempts > 0).then_some(self.max_delivery_attempts),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: self.retry_backoff,
        }
    }

    /// Timeout of each transport poll.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            max_delivery_attempts: 0,
            retry_backoff: default_retry_backoff(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: 0.0,
            brokers: default_brokers(),
            client_properties: BTreeMap::new(),
            rust_log: default_log_level(),
        }
    }
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_retry_backoff() -> BackoffStrategy {
    BackoffStrategy::Immediate
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
