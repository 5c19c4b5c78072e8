use std::{future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Adds up to 20% random jitter per delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt cap and base delay, no jitter.
    #[must_use]
    pub const fn fixed(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after `attempt` (1-based) failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base_delay.saturating_mul(1_u32 << exponent);
        let capped = scaled.min(self.max_delay);
        if self.jitter && !capped.is_zero() {
            let factor = rand::thread_rng().gen_range(1.0..1.2);
            capped.mul_f64(factor).min(self.max_delay)
        } else {
            capped
        }
    }

    /// Runs `op` until it succeeds, `should_retry` rejects the error, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts || !should_retry(&err) => return Err(err),
                Err(_) => {
                    sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Runs `op`, retrying every error.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(op, |_| true).await
    }
}
