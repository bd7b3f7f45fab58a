//! Delay policies for retried requests

use rand::Rng;
use std::time::Duration;

/// How the delay grows between consecutive attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// `base * 2^attempt`
    Exponential,
    /// `base * (attempt + 1)`
    Linear,
}

/// Attempt budget plus delay schedule for one class of failure
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max_attempts: u32,
    growth: Growth,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn exponential(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            growth: Growth::Exponential,
            jitter: false,
        }
    }

    pub fn linear(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            growth: Growth::Linear,
            jitter: false,
        }
    }

    /// Adds up to 20% random delay on top of each nominal delay
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Nominal delay after the failed attempt number `attempt` (0-based)
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = match self.growth {
            Growth::Exponential => 1u32.checked_shl(attempt).unwrap_or(u32::MAX),
            Growth::Linear => attempt.saturating_add(1),
        };
        self.base.saturating_mul(factor)
    }

    /// Delay to actually wait, jittered when enabled
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if !self.jitter {
            return nominal;
        }
        let spread = nominal.as_millis() as u64 / 5;
        if spread == 0 {
            return nominal;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        nominal.saturating_add(Duration::from_millis(extra))
    }
}
