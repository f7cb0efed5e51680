//! Resilience layer for remote API interactions
//!
//! Provides the shared token-bucket limiter, retry policies, the adaptive
//! concurrency controller and the executor that ties them together.

pub mod concurrency;
pub mod config;
pub mod executor;
pub mod rate_limiter;
pub mod retry;

pub use concurrency::{AdaptiveConcurrency, Adjustment, ConcurrencyStats};
pub use config::{
    BatchConfig, ConcurrencyConfig, DelayTiers, MonitoringConfig, PacingConfig, RateLimitConfig,
    ResilienceConfig, ResilienceConfigBuilder,
};
pub use executor::RequestExecutor;
pub use rate_limiter::{HeadroomTier, RateLimiter, RateLimiterStats};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
