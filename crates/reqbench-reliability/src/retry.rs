//! Retry with exponential backoff under a stage timeout.
//!
//! Every attempt runs inside `tokio::time::timeout`; an elapsed budget drops
//! the in-flight future and becomes a `Timeout` error for that attempt.

use reqbench_core::{HarnessError, HarnessResult, RetryPolicy, Stage};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Final result of a retried operation plus the attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: HarnessResult<T>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Wraps a failure that needed more than one attempt in `Exhausted`.
    pub fn into_result(self, name: &str) -> HarnessResult<T> {
        match self.result {
            Ok(value) => Ok(value),
            Err(err) if self.attempts > 1 => Err(HarnessError::Exhausted {
                name: name.to_string(),
                attempts: self.attempts,
                source: Box::new(err),
            }),
            Err(err) => Err(err),
        }
    }
}

/// Runs `operation` once under `budget`.
pub async fn with_timeout<T, Fut>(stage: Stage, budget: Duration, operation: Fut) -> HarnessResult<T>
where
    Fut: Future<Output = HarnessResult<T>>,
{
    match timeout(budget, operation).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::timeout(stage.as_str(), budget)),
    }
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// the policy's retry budget is spent.
///
/// The closure receives the 0-based attempt number.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: &RetryPolicy,
    stage: Stage,
    budget: Duration,
    name: &str,
    should_retry: P,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    P: Fn(&HarnessError) -> bool,
{
    let mut attempt = 0u32;

    loop {
        let result = with_timeout(stage, budget, operation(attempt)).await;
        attempt += 1;

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = name, attempts = attempt, "succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) if attempt <= policy.max_retries && should_retry(&err) => {
                let delay = policy.backoff_for_attempt(attempt - 1);
                warn!(
                    operation = name,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                sleep(delay).await;
            }
            Err(err) => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }
        }
    }
}
