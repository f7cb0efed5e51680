//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, the token-bucket
//! limiter, adaptive concurrency, pacing delays and batching, with sane
//! defaults for the commerce platform's admin API.

use super::retry::RetryConfig;
use std::time::Duration;

/// Global resilience configuration for API operations
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub concurrency: ConcurrencyConfig,
    pub pacing: PacingConfig,
    pub batch: BatchConfig,
    pub monitoring: MonitoringConfig,
}

/// Token-bucket configuration, including the refill tiers the executor
/// switches between based on the remote's reported headroom
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket size in calls
    pub capacity: f64,
    /// Refill rate (calls per second) while headroom is healthy
    pub refill_rate: f64,
    /// Refill rate while headroom is below `low_headroom`
    pub moderate_refill_rate: f64,
    /// Refill rate while headroom is below `critical_headroom`
    pub aggressive_refill_rate: f64,
    /// Refill rate after an explicit throttle signal
    pub throttled_refill_rate: f64,
    /// Fraction of remote budget below which the moderate tier applies
    pub low_headroom: f64,
    /// Fraction of remote budget below which the bucket is drained
    pub critical_headroom: f64,
    /// Added to every computed wait
    pub safety_margin: Duration,
    /// Small fixed delay after an immediate debit, to avoid bursts
    pub pacing_delay: Duration,
    pub enabled: bool,
}

/// Adaptive concurrency configuration
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Concurrent requests per sub-group at the start of a run
    pub initial_concurrent: usize,
    /// Upper bound the controller may grow to
    pub max_concurrent: usize,
    /// Chunks below this success rate count towards a decrease
    pub low_success_rate: f64,
    /// Chunks above this success rate count towards an increase
    pub high_success_rate: f64,
    /// Consecutive low chunks before shrinking
    pub failure_streak: u32,
    /// Consecutive high chunks before growing
    pub success_streak: u32,
    /// When disabled, concurrency stays at `initial_concurrent`
    pub enabled: bool,
}

/// Delay applied for a low, partial or full success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTiers {
    pub low: Duration,
    pub partial: Duration,
    pub full: Duration,
}

impl DelayTiers {
    pub const fn uniform(delay: Duration) -> Self {
        Self {
            low: delay,
            partial: delay,
            full: delay,
        }
    }

    /// Pick the delay for an observed success rate
    pub fn for_rate(&self, success_rate: f64, low_threshold: f64) -> Duration {
        if success_rate < low_threshold {
            self.low
        } else if success_rate < 1.0 {
            self.partial
        } else {
            self.full
        }
    }
}

/// Inter-request pacing used by the orchestrator
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Between sub-groups of one chunk
    pub sub_group: DelayTiers,
    /// Between chunks
    pub chunk: DelayTiers,
    /// Extra delay after concurrency was reduced
    pub penalty: Duration,
}

/// Chunking and request sizing
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Entities per chunk
    pub batch_size: usize,
    /// Aliased mutations packed into one request
    pub max_mutations_per_request: usize,
    /// Per-call timeout
    pub request_timeout: Duration,
    /// Timeout for downloading a bulk result file
    pub download_timeout: Duration,
    /// Metafield namespace attributes are written to
    pub attribute_namespace: String,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Tag each run's log lines with a run id
    pub correlation_ids: bool,
    /// Log every outbound request at debug level
    pub request_logging: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            pacing: PacingConfig::default(),
            batch: BatchConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 40.0,    // Admin API leaky bucket size
            refill_rate: 2.0,  // Admin API restore rate
            moderate_refill_rate: 1.0,
            aggressive_refill_rate: 0.5,
            throttled_refill_rate: 0.25,
            low_headroom: 0.20,
            critical_headroom: 0.05,
            safety_margin: Duration::from_millis(100),
            pacing_delay: Duration::from_millis(50),
            enabled: true,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial_concurrent: 2,
            max_concurrent: 3,
            low_success_rate: 0.5,
            high_success_rate: 0.9,
            failure_streak: 2,
            success_streak: 3,
            enabled: true,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sub_group: DelayTiers {
                low: Duration::from_secs(5),
                partial: Duration::from_secs(2),
                full: Duration::from_secs(1),
            },
            chunk: DelayTiers {
                low: Duration::from_secs(10),
                partial: Duration::from_secs(5),
                full: Duration::from_secs(2),
            },
            penalty: Duration::from_secs(5),
        }
    }
}

impl PacingConfig {
    /// No pacing delays at all
    pub fn none() -> Self {
        Self {
            sub_group: DelayTiers::uniform(Duration::ZERO),
            chunk: DelayTiers::uniform(Duration::ZERO),
            penalty: Duration::ZERO,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_mutations_per_request: 20,
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            attribute_namespace: "mm-google-shopping".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            correlation_ids: true,
            request_logging: false,
        }
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for large catalogs on busy stores
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            rate_limit: RateLimitConfig {
                refill_rate: 1.0,
                moderate_refill_rate: 0.5,
                aggressive_refill_rate: 0.25,
                throttled_refill_rate: 0.1,
                ..RateLimitConfig::default()
            },
            concurrency: ConcurrencyConfig {
                initial_concurrent: 1,
                max_concurrent: 2,
                ..ConcurrencyConfig::default()
            },
            pacing: PacingConfig::default(),
            batch: BatchConfig {
                batch_size: 10,
                max_mutations_per_request: 10,
                ..BatchConfig::default()
            },
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Aggressive config for development stores
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            rate_limit: RateLimitConfig {
                enabled: false, // Often disabled in dev
                ..RateLimitConfig::default()
            },
            concurrency: ConcurrencyConfig {
                initial_concurrent: 3,
                max_concurrent: 5,
                ..ConcurrencyConfig::default()
            },
            pacing: PacingConfig::none(),
            batch: BatchConfig {
                batch_size: 50,
                ..BatchConfig::default()
            },
            monitoring: MonitoringConfig {
                correlation_ids: true,
                request_logging: true,
            },
        }
    }

    /// Disable all resilience features (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::none(),
            rate_limit: RateLimitConfig {
                pacing_delay: Duration::ZERO,
                safety_margin: Duration::ZERO,
                enabled: false,
                ..RateLimitConfig::default()
            },
            concurrency: ConcurrencyConfig {
                enabled: false,
                ..ConcurrencyConfig::default()
            },
            pacing: PacingConfig::none(),
            batch: BatchConfig::default(),
            monitoring: MonitoringConfig {
                correlation_ids: false,
                request_logging: false,
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. a preset)
    pub fn from_config(config: ResilienceConfig) -> Self {
        Self { config }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set transient failures tolerated per call
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set the safety cap on throttled retries per call
    pub fn max_throttle_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_throttle_retries = retries;
        self
    }

    /// Configure rate limiting
    pub fn rate_limit_config(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Set bucket capacity and healthy refill rate
    pub fn bucket(mut self, capacity: f64, refill_rate: f64) -> Self {
        self.config.rate_limit.capacity = capacity;
        self.config.rate_limit.refill_rate = refill_rate;
        self
    }

    /// Enable/disable rate limiting
    pub fn enable_rate_limiting(mut self, enabled: bool) -> Self {
        self.config.rate_limit.enabled = enabled;
        self
    }

    /// Configure adaptive concurrency
    pub fn concurrency_config(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set starting and maximum concurrency
    pub fn concurrency(mut self, initial: usize, max: usize) -> Self {
        self.config.concurrency.initial_concurrent = initial;
        self.config.concurrency.max_concurrent = max;
        self
    }

    /// Enable/disable adaptive concurrency
    pub fn enable_adaptive_concurrency(mut self, enabled: bool) -> Self {
        self.config.concurrency.enabled = enabled;
        self
    }

    /// Configure pacing delays
    pub fn pacing_config(mut self, pacing: PacingConfig) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// Set entities per chunk
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch.batch_size = size;
        self
    }

    /// Set aliased mutations per request
    pub fn max_mutations_per_request(mut self, max: usize) -> Self {
        self.config.batch.max_mutations_per_request = max;
        self
    }

    /// Set per-call timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch.request_timeout = timeout;
        self
    }

    /// Set the metafield namespace attributes are written to
    pub fn attribute_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.batch.attribute_namespace = namespace.into();
        self
    }

    /// Enable/disable run ids in log lines
    pub fn correlation_ids(mut self, enabled: bool) -> Self {
        self.config.monitoring.correlation_ids = enabled;
        self
    }

    /// Enable/disable per-request debug logging
    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.config.monitoring.request_logging = enabled;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
