//! Token-bucket rate limiter
//!
//! One limiter is shared by every executor call in the process. Refill is
//! computed lazily from elapsed time on each acquisition; there is no
//! background timer. All bucket updates happen under a short, synchronous
//! critical section that never spans an `.await`, so concurrent callers
//! observe read-modify-write sequences atomically.

use super::config::RateLimitConfig;
use log::{debug, info};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant, sleep};

/// Lowest refill rate the bucket accepts, to keep wait computations finite
const MIN_REFILL_RATE: f64 = 0.001;

/// Pacing tier selected from the remote's reported rate-limit headroom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadroomTier {
    /// Default refill rate
    Healthy,
    /// Headroom below the low threshold: moderate cut
    Low,
    /// Headroom below the critical threshold: bucket drained, sharp cut
    Critical,
    /// Explicit throttle signal: bucket drained, slowest rate
    Throttled,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    tier: HeadroomTier,
    acquisitions: u64,
    debited: f64,
    waits: u64,
    waited: Duration,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).clamp(0.0, self.capacity);
        self.last_refill = now;
    }
}

/// Process-wide token bucket gating outbound calls
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a full bucket from the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = config.capacity.max(1.0);
        let state = BucketState {
            tokens: capacity,
            capacity,
            refill_rate: config.refill_rate.max(MIN_REFILL_RATE),
            last_refill: Instant::now(),
            tier: HeadroomTier::Healthy,
            acquisitions: 0,
            debited: 0.0,
            waits: 0,
            waited: Duration::ZERO,
        };

        Self {
            state: Mutex::new(state),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait as needed, then debit `cost` tokens
    pub async fn acquire(&self, cost: f64) {
        let cost = cost.max(0.0);

        let wait = {
            let mut state = self.lock();
            state.acquisitions += 1;
            state.debited += cost;

            if !self.config.enabled {
                return;
            }

            state.refill(Instant::now());
            if state.tokens >= cost {
                state.tokens -= cost;
                None
            } else {
                let deficit = cost - state.tokens;
                let wait = Duration::from_secs_f64(deficit / state.refill_rate)
                    + self.config.safety_margin;
                state.waits += 1;
                state.waited += wait;
                Some(wait)
            }
        };

        match wait {
            None => {
                if !self.config.pacing_delay.is_zero() {
                    sleep(self.config.pacing_delay).await;
                }
            }
            Some(wait) => {
                debug!("Rate limiter: waiting {:?} for {} token(s)", wait, cost);
                sleep(wait).await;
                // The wait is treated as having spent the whole bucket
                let mut state = self.lock();
                state.tokens = 0.0;
                state.last_refill = Instant::now();
            }
        }
    }

    /// Force the bucket empty
    pub fn drain(&self) {
        let mut state = self.lock();
        state.tokens = 0.0;
        state.last_refill = Instant::now();
    }

    /// Switch to the refill tier for the observed headroom.
    /// Returns true when the tier changed.
    pub fn apply_tier(&self, tier: HeadroomTier) -> bool {
        let rate = match tier {
            HeadroomTier::Healthy => self.config.refill_rate,
            HeadroomTier::Low => self.config.moderate_refill_rate,
            HeadroomTier::Critical => self.config.aggressive_refill_rate,
            HeadroomTier::Throttled => self.config.throttled_refill_rate,
        };

        let mut state = self.lock();
        state.refill(Instant::now());
        if matches!(tier, HeadroomTier::Critical | HeadroomTier::Throttled) {
            state.tokens = 0.0;
        }
        state.refill_rate = rate.max(MIN_REFILL_RATE);

        let previous = std::mem::replace(&mut state.tier, tier);
        if previous != tier {
            info!(
                "Rate limiter: {:?} -> {:?} (refill {:.3}/s)",
                previous, tier, state.refill_rate
            );
        }
        previous != tier
    }

    /// Tokens currently available, including refill accrued since the last update
    pub fn tokens(&self) -> f64 {
        let state = self.lock();
        let elapsed = Instant::now()
            .saturating_duration_since(state.last_refill)
            .as_secs_f64();
        (state.tokens + elapsed * state.refill_rate).clamp(0.0, state.capacity)
    }

    pub fn capacity(&self) -> f64 {
        self.lock().capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.lock().refill_rate
    }

    pub fn tier(&self) -> HeadroomTier {
        self.lock().tier
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get current statistics
    pub fn stats(&self) -> RateLimiterStats {
        let tokens = self.tokens();
        let state = self.lock();
        RateLimiterStats {
            tokens,
            capacity: state.capacity,
            refill_rate: state.refill_rate,
            tier: state.tier,
            acquisitions: state.acquisitions,
            debited: state.debited,
            waits: state.waits,
            waited: state.waited,
            enabled: self.config.enabled,
        }
    }
}

/// Statistics for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub tier: HeadroomTier,
    /// Number of acquisitions since creation
    pub acquisitions: u64,
    /// Total tokens debited since creation
    pub debited: f64,
    /// Acquisitions that had to wait
    pub waits: u64,
    /// Total time spent waiting
    pub waited: Duration,
    pub enabled: bool,
}
