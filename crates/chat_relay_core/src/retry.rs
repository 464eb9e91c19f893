//! crates/chat_relay_core/src/retry.rs
//!
//! Bounded retries with linear backoff around a `CompletionService` call.
//! Every error is treated as retryable.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::Turn;
use crate::ports::{CompletionService, PortResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause taken after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Calls the completion service until it succeeds or the attempts run out.
///
/// No sleep follows the final failed attempt; its error is returned as is.
pub async fn call_with_retry(
    service: &dyn CompletionService,
    history: &[Turn],
    policy: &RetryPolicy,
) -> PortResult<Turn> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match service.complete(history).await {
            Ok(reply) => {
                if attempt > 1 {
                    info!(attempt, "Completion succeeded after retrying");
                }
                return Ok(reply);
            }
            Err(e) if attempt >= max_attempts => {
                error!(attempt, error = %e, "Completion failed; giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Completion attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
