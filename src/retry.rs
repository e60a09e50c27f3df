//! Retry with backoff and fixed pacing between service calls.

use crate::error::{Result, SlrError};
use crate::llm_client::{Completion, CompletionRequest, CompletionService};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// How the wait grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base` every time
    Constant,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl FromStr for Backoff {
    type Err = SlrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "constant" => Ok(Backoff::Constant),
            "linear" => Ok(Backoff::Linear),
            "exponential" => Ok(Backoff::Exponential),
            other => Err(SlrError::Config(format!("Unknown backoff '{}'", other))),
        }
    }
}

/// Retry settings for one service call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        }
    }
}

/// Inserts a fixed delay before every call except the first.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    called: bool,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            called: false,
        }
    }

    /// Wait for rate limit interval
    pub async fn wait(&mut self) {
        if self.called && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.called = true;
    }
}

/// Call `service` until it succeeds or `policy.max_attempts` calls have failed.
///
/// Sleeps the backoff between attempts but not after the last one; returns
/// the last error once attempts are exhausted.
pub async fn call_with_retry<S: CompletionService>(
    service: &S,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    limiter: &mut RateLimiter,
) -> Result<Completion> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        limiter.wait().await;
        match service.complete(request).await {
            Ok(completion) => return Ok(completion),
            Err(e) if attempt < max_attempts => {
                let wait = policy.delay_after(attempt);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "LLM call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(attempts = attempt, error = %e, "LLM call failed after all retries");
                return Err(e);
            }
        }
    }
}
