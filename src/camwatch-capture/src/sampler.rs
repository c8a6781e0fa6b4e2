//! Load-adaptive frame sampling
//!
//! The sampler looks at the ingestion backlog before every frame and picks
//! a sample rate `r`: below the low-water mark every frame is decoded,
//! above it only every `r`-th arriving frame is, with `r` growing linearly
//! with the excess backlog.

use tracing::{debug, info};

/// Counter wraps before it can lose precision when compared as a float
const COUNTER_WRAP: u64 = 10_000_000_000;

/// Sampler thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Backlog below which every frame is processed
    pub low_water_mark: usize,
    /// Backlog subtracted before scaling
    pub rate_offset: usize,
    /// Backlog per unit of sample rate above the offset
    pub rate_step: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 500,
            rate_offset: 400,
            rate_step: 100,
        }
    }
}

impl SamplerConfig {
    /// Sample rate for a given backlog
    pub fn rate_for(&self, backlog: usize) -> u64 {
        if backlog < self.low_water_mark {
            return 1;
        }
        let excess = backlog.saturating_sub(self.rate_offset) as u64;
        let step = self.rate_step.max(1) as u64;
        excess.div_ceil(step).max(1)
    }
}

#[derive(Debug)]
pub struct AdaptiveSampler {
    config: SamplerConfig,
    rate: u64,
    counter: u64,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            rate: 1,
            counter: 0,
        }
    }

    /// Recompute the sample rate from the current backlog
    pub fn adjust(&mut self, backlog: usize) -> u64 {
        let rate = self.config.rate_for(backlog);
        if rate != self.rate {
            if rate > 1 {
                info!("queue size {}; sampling rate set to {}", backlog, rate);
            } else {
                debug!("backlog cleared, processing every frame");
            }
            self.rate = rate;
        }
        rate
    }

    /// Count one dequeued frame; true if it should be decoded
    pub fn tick(&mut self) -> bool {
        self.counter = if self.counter >= COUNTER_WRAP {
            1
        } else {
            self.counter + 1
        };
        self.counter % self.rate == 0
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn reset(&mut self) {
        self.rate = 1;
        self.counter = 0;
    }
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_is_one_below_low_water_mark() {
        let config = SamplerConfig::default();
        for backlog in 0..500 {
            assert_eq!(config.rate_for(backlog), 1, "backlog {}", backlog);
        }
    }

    #[test]
    fn test_rate_is_non_decreasing_above_low_water_mark() {
        let config = SamplerConfig::default();
        let mut last = config.rate_for(500);
        for backlog in 500..5000 {
            let rate = config.rate_for(backlog);
            assert!(rate >= last, "rate dropped at backlog {}", backlog);
            last = rate;
        }
        assert_eq!(config.rate_for(500), 1);
        assert_eq!(config.rate_for(501), 2);
        assert_eq!(config.rate_for(1000), 6);
        assert_eq!(config.rate_for(1001), 7);
    }

    #[test]
    fn test_tick_processes_every_rth_frame() {
        let mut sampler = AdaptiveSampler::default();
        sampler.adjust(0);
        assert!((0..10).all(|_| sampler.tick()));

        sampler.adjust(800); // rate 4
        assert_eq!(sampler.rate(), 4);
        let processed = (0..40).filter(|_| sampler.tick()).count();
        assert_eq!(processed, 10);
    }

    #[test]
    fn test_counter_wraps() {
        let mut sampler = AdaptiveSampler::default();
        sampler.counter = COUNTER_WRAP;
        sampler.adjust(600); // rate 2
        assert!(!sampler.tick());
        assert_eq!(sampler.counter, 1);
        assert!(sampler.tick());
    }
}
