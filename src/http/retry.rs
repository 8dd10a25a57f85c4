//! Bounded retry with a fixed delay between attempts.
//!
//! Event delivery retries at most once and always waits the same amount of time before
//! the retry, so delivery latency stays predictable for callers that flush on shutdown.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{ErrorCode, EventsError, Result};

/// Default number of attempts (the first try plus one retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default delay before a retry, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Default: 2
    pub max_attempts: u32,

    /// Delay before each retry. Default: 1 second
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Delay to wait before the given attempt (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Builder for RetryPolicy.
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    delay: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set maximum attempts. Values below 1 are raised to 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Set the delay before a retry.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Build the policy.
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            delay: self
                .delay
                .unwrap_or(Duration::from_millis(DEFAULT_RETRY_DELAY_MS)),
        }
    }
}

/// Determine if an error is retryable.
pub fn is_retryable(error: &EventsError) -> bool {
    error.is_recoverable()
}

/// Result of a retry operation with metadata.
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The final outcome.
    pub outcome: Result<T>,
    /// Number of attempts made.
    pub attempts: u32,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Convert to a standard Result.
    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

/// Execute an async operation, retrying while `should_retry` accepts the error.
///
/// # Example
///
/// ```rust,ignore
/// use flagkit_events::http::retry::{with_retry_predicate, is_retryable, RetryPolicy};
///
/// let result = with_retry_predicate(|_| async { post_batch().await }, &RetryPolicy::default(), is_retryable).await;
/// ```
pub async fn with_retry_predicate<T, F, Fut, P>(
    operation: F,
    policy: &RetryPolicy,
    should_retry: P,
) -> RetryResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&EventsError) -> bool,
{
    let mut last_error: Option<EventsError> = None;
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tracing::debug!(
                "Retry attempt {} of {}, waiting {:?}",
                attempt,
                max_attempts,
                delay
            );
            sleep(delay).await;
        }

        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    outcome: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => {
                if !should_retry(&e) {
                    return RetryResult {
                        outcome: Err(e),
                        attempts: attempt,
                    };
                }
                last_error = Some(e);
            }
        }
    }

    RetryResult {
        outcome: Err(last_error.unwrap_or_else(|| {
            EventsError::network_error(
                ErrorCode::NetworkRetryLimit,
                "Maximum retry attempts exceeded",
            )
        })),
        attempts: max_attempts,
    }
}

/// Execute an async operation with the default recoverability predicate.
pub async fn with_retry<T, F, Fut>(operation: F, policy: &RetryPolicy) -> RetryResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_predicate(operation, policy, is_retryable).await
}
