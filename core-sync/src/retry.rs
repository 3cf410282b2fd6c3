//! Bounded exponential backoff for transient failures

use bridge_traits::http::RetryPolicy;
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::Result;

/// Run `attempt` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
///
/// Only errors with [`SyncError::is_transient`](crate::SyncError::is_transient)
/// are retried; the last error is returned unchanged.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut tries = 0;

    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tries < max_attempts => {
                let delay = policy.delay_for(tries);
                warn!(
                    operation,
                    attempt = tries,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    debug!(operation, attempts = tries, "Retry budget exhausted");
                }
                return Err(e);
            }
        }
    }
}
