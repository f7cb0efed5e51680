//! Retry classification and backoff schedules
//!
//! Three outcomes are possible for a failed call:
//! - throttled: retried with a high, non-decreasing backoff that does not
//!   consume the normal retry budget
//! - transient (timeouts, aborted connections, 5xx): retried up to
//!   `max_retries` with exponential backoff
//! - anything else: surfaced immediately

use crate::api::error::ApiError;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Transient failures tolerated for one call; the call fails on the last one
    pub max_retries: u32,
    /// First transient backoff
    pub base_delay: Duration,
    /// Upper bound for transient backoff
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread transient backoff by +/-25%
    pub jitter: bool,
    /// First throttle backoff
    pub throttle_base_delay: Duration,
    /// Upper bound for throttle backoff
    pub throttle_max_delay: Duration,
    /// Safety valve for calls that stay throttled forever
    pub max_throttle_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            throttle_base_delay: Duration::from_secs(4),
            throttle_max_delay: Duration::from_secs(60),
            max_throttle_retries: 30,
        }
    }
}

impl RetryConfig {
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            throttle_base_delay: Duration::from_secs(8),
            throttle_max_delay: Duration::from_secs(120),
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            throttle_base_delay: Duration::from_secs(2),
            throttle_max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// No backoff at all; transient failures are not retried
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            throttle_base_delay: Duration::ZERO,
            throttle_max_delay: Duration::ZERO,
            max_throttle_retries: 30,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back off on the throttle schedule; does not count against `max_retries`
    Throttled,
    /// Back off on the transient schedule; counts against `max_retries`
    Transient,
    /// Surface the error now
    Fatal,
}

/// Stateless policy derived from a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classify(&self, error: &ApiError) -> RetryDecision {
        match error {
            ApiError::Throttled(_) => RetryDecision::Throttled,
            ApiError::Transient(_) => RetryDecision::Transient,
            _ => RetryDecision::Fatal,
        }
    }

    /// Backoff before retry number `streak` (0-based) of a throttled call.
    /// Non-decreasing in `streak` and capped at `throttle_max_delay`.
    pub fn throttle_delay(&self, streak: u32) -> Duration {
        exponential(
            self.config.throttle_base_delay,
            self.config.backoff_multiplier,
            streak,
            self.config.throttle_max_delay,
        )
    }

    /// Backoff before retry number `attempt` (0-based) of a transient failure
    pub fn transient_delay(&self, attempt: u32) -> Duration {
        let delay = exponential(
            self.config.base_delay,
            self.config.backoff_multiplier,
            attempt,
            self.config.max_delay,
        );
        if self.config.jitter && !delay.is_zero() {
            let factor = rand::random::<f64>() * 0.5 + 0.75;
            delay.mul_f64(factor).min(self.config.max_delay)
        } else {
            delay
        }
    }

    /// Transient failures allowed for one call (never below 1)
    pub fn max_retries(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.config.max_retries).max(1)
    }
}

fn exponential(base: Duration, multiplier: f64, step: u32, cap: Duration) -> Duration {
    let factor = multiplier.max(1.0).powi(step.min(32) as i32);
    let millis = base.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= cap.as_millis() as f64 {
        cap
    } else {
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(
            policy.classify(&ApiError::Throttled("slow down".into())),
            RetryDecision::Throttled
        );
        assert_eq!(
            policy.classify(&ApiError::Transient("timeout".into())),
            RetryDecision::Transient
        );
        assert_eq!(
            policy.classify(&ApiError::Client {
                status: 404,
                message: "nope".into()
            }),
            RetryDecision::Fatal
        );
        assert_eq!(
            policy.classify(&ApiError::Mutation("bad field".into())),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn test_throttle_backoff_is_monotonic_and_capped() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.throttle_delay(0), Duration::from_secs(4));
        assert_eq!(policy.throttle_delay(1), Duration::from_secs(8));
        assert_eq!(policy.throttle_delay(2), Duration::from_secs(16));

        let mut previous = Duration::ZERO;
        for streak in 0..100 {
            let delay = policy.throttle_delay(streak);
            assert!(delay >= previous, "streak {streak}: {delay:?} < {previous:?}");
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(60));
    }

    #[test]
    fn test_transient_backoff_without_jitter() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        });
        assert_eq!(policy.transient_delay(0), Duration::from_millis(500));
        assert_eq!(policy.transient_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.transient_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.transient_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig::default());
        for _ in 0..50 {
            let delay = policy.transient_delay(1);
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_max_retries_floor() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.max_retries(None), 3);
        assert_eq!(policy.max_retries(Some(0)), 1);
        assert_eq!(policy.max_retries(Some(7)), 7);
    }
}
