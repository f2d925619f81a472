//! Bounded retry with exponential backoff and full jitter for Bot API calls.
//!
//! Used for update polling and admin replies. Prediction broadcasts are never
//! retried: a destination that fails is logged and skipped.

use crate::error::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Cap on a single backoff, including server-requested `retry_after`
    pub max_delay_ms: u64,
    /// Cap on total time spent across attempts
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            max_elapsed_ms: 60_000,
        }
    }
}

fn env_u64(name: &str, default: u64, valid: impl Fn(u64) -> bool) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| valid(n))
        .unwrap_or(default)
}

impl RetryPolicy {
    /// `RETRY_MAX_ATTEMPTS` (1..=10), `RETRY_BASE_DELAY_MS`, `RETRY_MAX_DELAY_MS`,
    /// `RETRY_MAX_ELAPSED_MS`; anything missing or invalid keeps the default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_u64("RETRY_MAX_ATTEMPTS", d.max_attempts as u64, |n| {
                (1..=10).contains(&n)
            }) as u32,
            base_delay_ms: env_u64("RETRY_BASE_DELAY_MS", d.base_delay_ms, |n| n > 0),
            max_delay_ms: env_u64("RETRY_MAX_DELAY_MS", d.max_delay_ms, |n| n > 0),
            max_elapsed_ms: env_u64("RETRY_MAX_ELAPSED_MS", d.max_elapsed_ms, |n| n > 0),
        }
    }

    /// Capped exponential delay before jitter: `min(max, base * 2^(attempt-1))`.
    pub fn backoff_cap_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }

    /// Full jitter: uniform in `[0, cap)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let cap = self.backoff_cap_ms(attempt);
        if cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..cap)
        }
    }

    /// Delay before the next attempt; a server `retry_after` replaces the jittered
    /// backoff.
    fn delay_for(&self, attempt: u32, err: &TransportError) -> u64 {
        match err.retry_after_secs() {
            Some(secs) => secs.saturating_mul(1000).min(self.max_delay_ms),
            None => self.backoff_ms(attempt),
        }
    }
}

/// Network errors, 429 and 5xx are retried. Other API rejections (bad chat id,
/// message not modified, forbidden) and malformed responses are not.
pub fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Http(e) => match e.status() {
            Some(status) => matches!(status.as_u16(), 408 | 425 | 429 | 500..=599),
            None => true,
        },
        TransportError::Api { code, .. } => matches!(code, 408 | 425 | 429 | 500..=599),
        TransportError::Malformed(_) => false,
        TransportError::Unavailable(_) => true,
    }
}

pub async fn retry_async<T, Fut, F>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            debug!(op = op_name, error = %err, "non-retryable error");
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            warn!(op = op_name, attempt, error = %err, "giving up after max attempts");
            return Err(err);
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms >= policy.max_elapsed_ms {
            warn!(op = op_name, elapsed_ms, error = %err, "giving up after max elapsed time");
            return Err(err);
        }

        let backoff_ms = policy
            .delay_for(attempt, &err)
            .min(policy.max_elapsed_ms - elapsed_ms);
        debug!(
            op = op_name,
            attempt,
            backoff_ms,
            status = ?err.status_code(),
            "retrying"
        );
        if backoff_ms > 0 {
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
        attempt += 1;
    }
}
