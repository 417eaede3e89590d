//! Bounded retry with fixed backoff for transient and conflict errors

use std::{future::Future, time::Duration};

use tracing::{Level, event};

use crate::domain::{
    constant::retry,
    error::{ErrorKind, RunnerError}
};

/// Bounded retry policy applied at the call and event-application boundaries
///
/// Only errors whose kind appears in `retry_on` are retried; anything else
/// fails immediately. Backoff is fixed, not exponential.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff:      Duration,
    retry_on:     Vec<ErrorKind>
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, retry_on: &[ErrorKind]) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, retry_on: retry_on.to_vec() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn is_retryable(&self, error: &RunnerError) -> bool {
        self.retry_on.contains(&error.kind())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is exhausted
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RunnerError>>
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if self.is_retryable(&error) && attempt < self.max_attempts => {
                    event!(Level::DEBUG, event = retry::ATTEMPT_FAILED, attempt, error = %error);
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    if attempt >= self.max_attempts && self.is_retryable(&error) {
                        event!(Level::DEBUG, event = retry::ATTEMPTS_EXHAUSTED, attempts = attempt, error = %error);
                    }
                    return Err(error);
                }
            }
        }
    }
}
