//! Retry policy - Reusable backoff wrapper for outbound provider calls
//!
//! Applied uniformly inside the LLM adapter so the pipeline only ever
//! observes a single terminal outcome per call. Exponential backoff with
//! jitter, bounded attempts, and a non-retryable predicate on the error
//! class (credentials and content filtering never retry).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::application::ports::outbound::ProviderError;

/// Backoff parameters for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied to each delay, e.g. 0.2 for +/-20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests and health checks.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts
    /// run out. The closure receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt + 1 >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        exp.mul_f64((1.0 + spread).max(0.0))
    }
}
