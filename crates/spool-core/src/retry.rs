//! Retry policy for broker-reported delivery failures.
//!
//! The default policy retries every failed delivery immediately and without
//! limit: `flush` only returns once the broker has accepted everything, and a
//! destination that never recovers keeps `flush` looping. Bounding attempts or
//! spacing retries out is opt-in through `RetryPolicy`.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How failed deliveries are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts per message, including the first.
    ///
    /// `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Base delay for the backoff calculation.
    pub base_delay: Duration,

    /// Upper bound on any single retry delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to computed delays.
    pub jitter_factor: f64,

    /// Strategy for spacing retries.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Immediate,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Resubmit on the next drain iteration.
    Immediate,
    /// Fixed delay between attempts.
    Fixed,
    /// Delay grows by the base amount each attempt.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
}

/// Outcome of consulting the policy after a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit once `not_before` has passed.
    Retry {
        /// Earliest instant the message may be resubmitted
        not_before: Instant,
    },
    /// Stop retrying this message.
    GiveUp {
        /// Why the message is abandoned
        reason: String,
    },
}

impl RetryPolicy {
    /// Policy that retries forever without delay.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Policy that abandons a message after `max_attempts` deliveries.
    pub fn bounded(max_attempts: u32) -> Self {
        Self { max_attempts: Some(max_attempts), ..Self::default() }
    }

    /// Returns `true` when this policy never gives up.
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }

    /// Decides what happens after the `attempts`-th delivery of a message
    /// failed at `failed_at`.
    pub fn decide(&self, attempts: u32, failed_at: Instant) -> RetryDecision {
        if let Some(max_attempts) = self.max_attempts {
            if attempts >= max_attempts {
                return RetryDecision::GiveUp {
                    reason: format!("maximum attempts ({max_attempts}) exceeded"),
                };
            }
        }

        RetryDecision::Retry { not_before: failed_at + self.delay_for(attempts) }
    }

    /// Delay before the retry that follows the `attempts`-th failure.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Immediate => return Duration::ZERO,
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempts.max(1)),
            BackoffStrategy::Exponential => {
                let exponent = attempts.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped_delay = base_delay.min(self.max_delay);
        apply_jitter(capped_delay, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
