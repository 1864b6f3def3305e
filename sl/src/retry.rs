//! Bounded exponential-backoff retries for async operations
//!
//! Attempt 1 runs immediately. After failed attempt `n` the policy waits
//! `backoff_base^n + jitter` seconds (jitter uniform in `[0, 1)`), and once
//! `max_attempts` is spent the last error is handed back to the caller.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on a single backoff wait
const MAX_DELAY: Duration = Duration::from_secs(600);

/// The operation failed on every allowed attempt (or failed permanently)
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of attempts actually made
    pub attempts: u32,
    /// Error from the final attempt
    #[source]
    pub source: E,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Error from the final attempt
    pub fn last_error(&self) -> &E {
        &self.source
    }

    /// Unwrap into the final attempt's error
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Retry policy for one fallible async call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (0 is treated as 1)
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff, in seconds
    #[serde(rename = "backoff-base")]
    pub backoff_base: f64,

    /// Add up to one second of random jitter to each wait
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with jitter enabled
    pub fn new(max_attempts: u32, backoff_base: f64) -> Self {
        Self {
            max_attempts,
            backoff_base,
            jitter: true,
        }
    }

    /// Disable jitter (deterministic waits)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Wait after failed attempt `attempt` (1-indexed) given a jitter sample
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.max(0.0).powi(exponent) + jitter.max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(MAX_DELAY).min(MAX_DELAY)
    }

    /// Run `op`, retrying every failure
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.run_if(op, |_| true).await
    }

    /// Run `op`, retrying only failures for which `should_retry` is true
    ///
    /// A failure the predicate rejects is returned immediately, wrapped with
    /// the number of attempts made so far.
    pub async fn run_if<T, E, F, Fut, P>(&self, op: F, should_retry: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: FnMut(&E) -> bool,
    {
        self.run_with_floor(op, should_retry, |_| None).await
    }

    /// Like [`run_if`](Self::run_if), but never waits less than `min_wait(&error)`
    ///
    /// Used to honour a rate limiter's `retry-after` when it exceeds the backoff.
    pub async fn run_with_floor<T, E, F, Fut, P, W>(
        &self,
        mut op: F,
        mut should_retry: P,
        mut min_wait: W,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: FnMut(&E) -> bool,
        W: FnMut(&E) -> Option<Duration>,
    {
        let max_attempts = self.max_attempts.max(1);
        debug!(max_attempts, backoff_base = self.backoff_base, "run_with_floor: called");

        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        warn!(attempt, max_attempts, %error, "Attempt failed, retries exhausted");
                        return Err(RetryError {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    if !should_retry(&error) {
                        warn!(attempt, %error, "Attempt failed with permanent error, not retrying");
                        return Err(RetryError {
                            attempts: attempt,
                            source: error,
                        });
                    }

                    let jitter = if self.jitter { rand::rng().random::<f64>() } else { 0.0 };
                    let backoff = self.delay_for(attempt, jitter);
                    let wait = match min_wait(&error) {
                        Some(floor) if floor > backoff => floor.min(MAX_DELAY),
                        _ => backoff,
                    };
                    warn!(
                        attempt,
                        max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        backoff_secs = backoff.as_secs_f64(),
                        %error,
                        "Attempt failed, retrying in {:.1}s",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Run `op` with `max_attempts` attempts and `backoff_base` exponential backoff
pub async fn with_retries<T, E, F, Fut>(op: F, max_attempts: u32, backoff_base: f64) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    RetryPolicy::new(max_attempts, backoff_base).run(op).await
}
