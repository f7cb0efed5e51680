//! Adaptive concurrency controller
//!
//! Decides how many requests the orchestrator keeps in flight per sub-group.
//! After every chunk the controller is fed the chunk's success rate: a run of
//! poor chunks shrinks concurrency, a run of excellent chunks grows it. The
//! value never leaves `[1, max_concurrent]`.

use super::config::ConcurrencyConfig;
use log::{debug, info};

/// Change applied after a chunk was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Unchanged,
    Decreased { from: usize, to: usize },
    /// Failure streak reached while already at the floor
    HeldAtFloor,
    Increased { from: usize, to: usize },
}

/// Per-run proportional controller for in-flight request count
#[derive(Debug, Clone)]
pub struct AdaptiveConcurrency {
    config: ConcurrencyConfig,
    current: usize,
    ceiling: usize,
    failure_streak: u32,
    success_streak: u32,
    chunks_recorded: u64,
    decreases: u64,
    increases: u64,
}

impl Adjustment {
    /// Whether the orchestrator should back off with a penalty delay
    pub fn is_penalty(&self) -> bool {
        matches!(self, Self::Decreased { .. } | Self::HeldAtFloor)
    }
}

impl AdaptiveConcurrency {
    /// Create a controller with the given configuration
    pub fn new(config: ConcurrencyConfig) -> Self {
        let ceiling = config.max_concurrent.max(1);
        let current = config.initial_concurrent.clamp(1, ceiling);

        Self {
            config,
            current,
            ceiling,
            failure_streak: 0,
            success_streak: 0,
            chunks_recorded: 0,
            decreases: 0,
            increases: 0,
        }
    }

    /// Requests to dispatch concurrently right now
    pub fn current(&self) -> usize {
        self.current
    }

    /// Maximum concurrency the controller may grow to
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Check if adaptation is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Feed the success rate of a finished chunk
    pub fn record_chunk(&mut self, success_rate: f64) -> Adjustment {
        self.chunks_recorded += 1;

        if !self.config.enabled {
            return Adjustment::Unchanged;
        }

        if success_rate < self.config.low_success_rate {
            self.failure_streak += 1;
            self.success_streak = 0;
        } else if success_rate > self.config.high_success_rate {
            self.success_streak += 1;
            self.failure_streak = 0;
        } else {
            self.failure_streak = 0;
            self.success_streak = 0;
        }

        debug!(
            "Concurrency controller: rate {:.2}, failure streak {}, success streak {}",
            success_rate, self.failure_streak, self.success_streak
        );

        if self.failure_streak >= self.config.failure_streak.max(1) {
            self.failure_streak = 0;
            if self.current > 1 {
                let from = self.current;
                self.current -= 1;
                self.decreases += 1;
                info!("Concurrency controller: reducing concurrency {} -> {}", from, self.current);
                return Adjustment::Decreased {
                    from,
                    to: self.current,
                };
            }
            return Adjustment::HeldAtFloor;
        } else if self.success_streak >= self.config.success_streak.max(1)
            && self.current < self.ceiling
        {
            self.success_streak = 0;
            let from = self.current;
            self.current += 1;
            self.increases += 1;
            info!("Concurrency controller: raising concurrency {} -> {}", from, self.current);
            return Adjustment::Increased {
                from,
                to: self.current,
            };
        }

        Adjustment::Unchanged
    }

    /// Get current statistics
    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            current: self.current,
            ceiling: self.ceiling,
            chunks_recorded: self.chunks_recorded,
            decreases: self.decreases,
            increases: self.increases,
            enabled: self.config.enabled,
        }
    }
}

/// Statistics for the concurrency controller
#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    /// Concurrency in effect
    pub current: usize,
    /// Maximum concurrency allowed
    pub ceiling: usize,
    /// Chunks fed to the controller
    pub chunks_recorded: u64,
    /// Times concurrency was reduced
    pub decreases: u64,
    /// Times concurrency was raised
    pub increases: u64,
    /// Whether adaptation is enabled
    pub enabled: bool,
}

impl ConcurrencyStats {
    /// Fraction of chunks that caused any adjustment
    pub fn adjustment_rate(&self) -> f64 {
        if self.chunks_recorded == 0 {
            0.0
        } else {
            (self.decreases + self.increases) as f64 / self.chunks_recorded as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(initial: usize, max: usize) -> AdaptiveConcurrency {
        AdaptiveConcurrency::new(ConcurrencyConfig {
            initial_concurrent: initial,
            max_concurrent: max,
            ..ConcurrencyConfig::default()
        })
    }

    #[test]
    fn test_decreases_after_two_poor_chunks() {
        let mut c = controller(2, 3);
        assert_eq!(c.record_chunk(0.2), Adjustment::Unchanged);
        assert_eq!(c.record_chunk(0.4), Adjustment::Decreased { from: 2, to: 1 });
        assert_eq!(c.current(), 1);

        c.record_chunk(0.0);
        let held = c.record_chunk(0.0);
        assert_eq!(held, Adjustment::HeldAtFloor);
        assert!(held.is_penalty());
        assert_eq!(c.current(), 1);
    }

    #[test]
    fn test_increases_after_three_excellent_chunks() {
        let mut c = controller(2, 3);
        assert_eq!(c.record_chunk(1.0), Adjustment::Unchanged);
        assert_eq!(c.record_chunk(0.95), Adjustment::Unchanged);
        assert_eq!(c.record_chunk(1.0), Adjustment::Increased { from: 2, to: 3 });

        // At the ceiling nothing more happens
        for _ in 0..10 {
            assert_eq!(c.record_chunk(1.0), Adjustment::Unchanged);
        }
        assert_eq!(c.current(), 3);
    }

    #[test]
    fn test_middling_chunk_resets_streaks() {
        let mut c = controller(2, 3);
        c.record_chunk(0.1);
        c.record_chunk(0.7);
        assert_eq!(c.record_chunk(0.1), Adjustment::Unchanged);
        assert_eq!(c.current(), 2);
    }

    #[test]
    fn test_floor_and_ceiling_hold() {
        let mut c = controller(2, 3);
        for _ in 0..50 {
            c.record_chunk(0.0);
            assert!((1..=3).contains(&c.current()));
        }
        assert_eq!(c.current(), 1);
        for _ in 0..50 {
            c.record_chunk(1.0);
            assert!((1..=3).contains(&c.current()));
        }
        assert_eq!(c.current(), 3);
    }

    #[test]
    fn test_initial_value_is_clamped() {
        assert_eq!(controller(0, 3).current(), 1);
        assert_eq!(controller(10, 3).current(), 3);
        assert_eq!(controller(2, 0).ceiling(), 1);
    }

    #[test]
    fn test_disabled_controller_is_fixed() {
        let mut c = AdaptiveConcurrency::new(ConcurrencyConfig {
            enabled: false,
            ..ConcurrencyConfig::default()
        });
        for _ in 0..10 {
            assert_eq!(c.record_chunk(0.0), Adjustment::Unchanged);
        }
        assert_eq!(c.current(), 2);
        assert!(!c.is_enabled());
    }

    #[test]
    fn test_stats() {
        let mut c = controller(2, 3);
        c.record_chunk(0.0);
        c.record_chunk(0.0);
        let stats = c.stats();
        assert_eq!(stats.current, 1);
        assert_eq!(stats.ceiling, 3);
        assert_eq!(stats.chunks_recorded, 2);
        assert_eq!(stats.decreases, 1);
        assert!((stats.adjustment_rate() - 0.5).abs() < f64::EPSILON);
    }
}
