//! Bounded retry of transient provider failures.
//!
//! Only [`ProviderError::Transient`] is retried. Fatal errors return at once,
//! and running out of attempts turns the last transient failure into
//! [`ProviderError::Unavailable`].

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `base_delay`.
    Fixed,
    /// Wait `base_delay · 2^(n-1)` after the n-th failed attempt.
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Wait after the `attempt`-th (1-based) failed call.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1u32 << shift)
            }
        }
    }
}

/// Call `f` until it succeeds, fails fatally, or `policy` is exhausted.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &'static str,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt == max_attempts {
                    tracing::warn!(provider, attempt, error = %e, "retries exhausted");
                    break;
                }
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    provider,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(ProviderError::Unavailable {
        provider,
        attempts: max_attempts,
    })
}
