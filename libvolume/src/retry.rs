//! Bounded retry for transient cluster failures.
//!
//! The policy decides *whether* and *how often* to repeat an operation; the
//! classification of a failure as transient lives in [`CommandFailure`].

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::CommandFailure;

/// Bounded retry of cluster calls that fail with [`FailureKind::Busy`].
///
/// [`FailureKind::Busy`]: crate::error::FailureKind::Busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.  Always >= 1.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether a failure of attempt number `attempt` (1-based) should be
    /// followed by another attempt.
    pub fn should_retry(&self, attempt: u32, failure: &CommandFailure) -> bool {
        failure.is_retryable() && attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts are
    /// exhausted.  `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, CommandFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CommandFailure>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(failure) if self.should_retry(attempt, &failure) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %failure,
                        "transient failure, retrying",
                    );
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}
