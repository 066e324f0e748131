//! Bounded retry for fallible async operations.

use std::future::Future;

use tracing::warn;

use crate::error::{Error, Result};

/// Run `operation` up to `max_attempts` times, returning the first success.
///
/// Each failure is logged. When every attempt fails the final error is wrapped
/// in [`Error::RetryExhausted`]. `max_attempts` of zero is treated as one.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "Attempt failed");
                if attempt >= max_attempts {
                    return Err(Error::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                attempt += 1;
            }
        }
    }
}
