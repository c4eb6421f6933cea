//! Bounded retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::{SinkError, SinkResult};

/// Retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound of any single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `attempt` (1-based): `min(max, base * 2^(attempt-1))`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, the attempts are used up, or `cancel` fires.
    ///
    /// Cancellation is reported as `SinkError::Cancelled`, never as the write
    /// error it interrupted, and is never retried.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> SinkResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SinkResult<()>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts() {
            if attempt > 0 {
                let delay = self.delay_for(attempt);
                trace!("retrying write in {delay:?} (attempt {})", attempt + 1);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SinkError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SinkError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(SinkError::Cancelled) => return Err(SinkError::Cancelled),
                Err(e) => {
                    debug!("write attempt {} failed: {e}", attempt + 1);
                    if cancel.is_cancelled() {
                        return Err(SinkError::Cancelled);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(SinkError::Exhausted {
            attempts: self.max_attempts(),
            last: Box::new(
                last_error.unwrap_or_else(|| SinkError::Request("no attempt made".to_string())),
            ),
        })
    }
}
