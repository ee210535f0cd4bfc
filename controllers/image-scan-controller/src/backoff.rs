//! # Fibonacci Backoff
//!
//! Retry delays for transient failures of the cluster and DefectDojo APIs.
//! The sequence grows more slowly than exponential backoff:
//! base, base, 2*base, 3*base, 5*base, ... capped at the configured maximum.

use crate::config::RunConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting from `min` twice.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);
        result
    }
}

/// Bounded retry settings
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Retry settings from the `run` section
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            attempts: run.retry_attempts.max(1),
            base_delay: Duration::from_millis(run.retry_base_delay_ms),
            max_delay: Duration::from_millis(run.retry_max_delay_ms),
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are exhausted. The last error is returned.
    pub async fn retry<T, E, F, Fut>(
        &self,
        what: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = FibonacciBackoff::new(self.base_delay, self.max_delay);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && is_transient(&e) => {
                    let delay = backoff.next_backoff();
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, self.attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
