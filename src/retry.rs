use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::PollerConfig;
use crate::error::{GiveUpError, TransportError};
use crate::{Error, Result};

/// Bounded exponential backoff with additive jitter.
///
/// The delay after attempt `n` is `min(base * 2^n + jitter, max_delay)` with
/// `jitter < base * jitter_ratio`. Since `jitter_ratio <= 1`, consecutive
/// delays never decrease.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter_ratio: 0.0,
        }
    }

    pub fn from_config(config: &PollerConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base, config.backoff_max)
            .with_jitter(config.jitter_ratio)
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.min(31));
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let jitter = self.base_delay.mul_f64(self.jitter_ratio * unit);
        let multiplier = 2u32.saturating_pow(attempt.min(31));
        self.base_delay
            .saturating_mul(multiplier)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget runs out.
    ///
    /// Only [`TransportError::is_retryable`] failures are retried; others are
    /// returned at once as [`Error::Transport`].
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let mut delays = Vec::new();
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;

            if !err.is_retryable() {
                debug!(attempt, error = %err, "permanent failure, not retrying");
                return Err(Error::Transport(err));
            }
            if attempt >= self.max_attempts {
                return Err(Error::GiveUp(GiveUpError {
                    attempts: attempt,
                    last: err,
                    delays,
                }));
            }

            let delay = self.delay_for(attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            delays.push(delay);
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}
