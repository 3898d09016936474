//! Recovery strategies for handling transient errors.
//!
//! This module provides the `RecoveryStrategy` trait and `ExponentialBackoff`,
//! which drives the transactional store's retry loop.

use crate::error::{Error, Recoverability};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Strategy for recovering from transient errors.
pub trait RecoveryStrategy: Send + Sync {
    /// Decide whether to retry after an error.
    fn should_retry(&self, error: &Error, attempt: u32) -> bool;

    /// Get delay before next retry.
    fn backoff_duration(&self, attempt: u32) -> Duration;

    /// Maximum number of attempts this strategy allows.
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff with jitter.
///
/// The jitter is a deterministic function of the attempt and a per-strategy
/// seed. The seed defaults to a hash of the creating thread's id, so strategies
/// built on different threads spread their retries apart.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_attempts: u32,
    /// Randomization factor (0.0 to 1.0).
    jitter: f64,
    seed: u64,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy.
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            multiplier,
            max_attempts,
            jitter: 0.1,
            seed: thread_seed(),
        }
    }

    /// Sets the jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the jitter seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Backoff suited to short commit-lock contention.
    #[must_use]
    pub fn for_store() -> Self {
        Self::new(Duration::from_micros(200), Duration::from_millis(20), 2.0, 1_000)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::for_store()
    }
}

impl RecoveryStrategy for ExponentialBackoff {
    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        error.recoverability() == Recoverability::Transient
    }

    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let mut base_us = (self.initial.as_micros() as f64 * factor) as u64;

        let max_us = self.max.as_micros().min(u128::from(u64::MAX)) as u64;
        if base_us > max_us {
            base_us = max_us;
        }

        let jitter_amount = (base_us as f64 * self.jitter) as u64;
        let with_jitter = if jitter_amount == 0 {
            base_us
        } else {
            let jitter_range = jitter_amount.saturating_mul(2).max(1);
            let variation = mix_seed(self.seed ^ u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15)) % jitter_range;
            base_us
                .saturating_sub(jitter_amount)
                .saturating_add(variation)
        };

        Duration::from_micros(with_jitter)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

fn thread_seed() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

fn mix_seed(mut seed: u64) -> u64 {
    seed ^= seed >> 30;
    seed = seed.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    seed ^= seed >> 27;
    seed = seed.wrapping_mul(0x94d0_49bb_1331_11eb);
    seed ^= seed >> 31;
    seed
}
