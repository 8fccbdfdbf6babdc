//! Sequential retry with exponential backoff.

use crate::Result;
use crate::config::RetryPolicy;
use std::future::Future;

/// Runs `attempt_fn` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are exhausted.
///
/// `attempt_fn` receives the 0-based attempt number. After failed attempt `n`
/// the loop sleeps `policy.delay_for(n)`; no sleep follows the final attempt.
/// The last error is returned unchanged.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut attempt_fn: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded on attempt {}/{}", operation, attempt + 1, max_attempts);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!("{} failed with non-retryable error: {}", operation, e);
                return Err(e);
            }
            Err(e) if attempt + 1 >= max_attempts => {
                tracing::error!("All retry attempts failed for {}. Last error: {}", operation, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "Attempt {}/{} of {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    operation,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbReadyError;
    use std::cell::Cell;
    use std::time::Duration;
    use tokio::time::Instant;

    fn transient() -> DbReadyError {
        DbReadyError::connection_timeout("query", Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures_with_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result = retry_async(&policy, "probe", |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.get(), 3);
        // 100ms * (2^0 + 2^1)
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result: Result<()> = retry_async(&policy, "probe", |attempt| {
            calls.set(calls.get() + 1);
            async move { Err(DbReadyError::connection_timeout(format!("attempt {}", attempt), Duration::from_secs(1))) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("attempt 2"));
        assert_eq!(calls.get(), 3);
        // No sleep after the final attempt: 10 + 20
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let calls = Cell::new(0u32);

        let result: Result<()> = retry_async(&policy, "login", |_| {
            calls.set(calls.get() + 1);
            async {
                Err(DbReadyError::Authentication {
                    context: "password rejected".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(DbReadyError::Authentication { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        let result = retry_async(&policy, "once", |_| async { Ok::<_, DbReadyError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
