use crate::CoreError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed-delay retry for suite setup. Test failures are never retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Whether a failure on attempt number `attempt` (1-based) earns another try.
    pub fn should_retry(&self, attempt: u32, err: &CoreError) -> bool {
        attempt < self.max_attempts && err.is_setup()
    }
}

/// Sleep for `delay` unless the token fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), CoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
