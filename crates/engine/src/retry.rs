//! Retry policy for implicit-version writes
//!
//! An implicit write (no expected version) that loses a commit-time write
//! conflict re-reads the document and tries again. The delay between attempts
//! grows exponentially up to a cap, with random jitter so that writers that
//! collided once do not collide again in lockstep.

use std::time::Duration;

use apogy_core::{Context, Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for write retry behavior
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new()
///     .with_max_retries(20)
///     .with_base_delay_ms(1)
///     .with_max_delay_ms(50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 100,
            base_delay_ms: 1,
            max_delay_ms: 50,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound of the delay before retry number `attempt` (0-based)
    pub fn max_delay_for(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Delay before retry number `attempt`, jittered if enabled
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let cap = self.max_delay_for(attempt);
        if !self.jitter || cap.is_zero() {
            return cap;
        }
        let cap_us = cap.as_micros() as u64;
        let jittered = rand::thread_rng().gen_range(cap_us / 2..=cap_us);
        Duration::from_micros(jittered)
    }
}

/// Sleep for `delay`, waking early if the context is cancelled
///
/// # Errors
///
/// Returns `Cancelled` or `DeadlineExceeded` if the context is done before
/// or during the sleep. A deadline that falls inside the delay is reported
/// without sleeping past it.
pub fn backoff(ctx: &Context, delay: Duration) -> Result<()> {
    const SLICE: Duration = Duration::from_millis(10);

    ctx.check()?;
    let mut left = delay;
    if let Some(remaining) = ctx.remaining() {
        if remaining < left {
            std::thread::sleep(remaining);
            return Err(Error::DeadlineExceeded);
        }
    }
    while !left.is_zero() {
        let step = left.min(SLICE);
        std::thread::sleep(step);
        left -= step;
        ctx.check()?;
    }
    Ok(())
}
