//! The retry loop shared by the executor and batch engine (spec §4.8):
//! exponential backoff with jitter, driven by a [`dynamorm_config::RetryPolicy`].

use dynamorm_config::RetryPolicy;
use tracing::warn;

use crate::error::{Error, Result};

/// Calls `f` until it succeeds, returns a non-retryable error, or exhausts
/// `policy.max_retries`. `f` is re-invoked from scratch on each attempt —
/// callers are responsible for any per-attempt state (e.g. re-chunking
/// unprocessed keys) via the closure's captured state.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let sample: f64 = rand::random();
                let delay = policy.jittered_delay(attempt, sample);
                warn!(attempt, ?delay, "retrying after retryable error: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Like [`with_retry`] but the closure reports retryability itself (used by
/// the batch engine, where "retryable" means "there are still unprocessed
/// keys/items" rather than an `Error` variant).
pub async fn with_retry_while<T, F, Fut, IsDone>(
    policy: &RetryPolicy,
    mut f: F,
    mut is_done: IsDone,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    IsDone: FnMut(&T) -> bool,
{
    let mut attempt = 0u32;
    loop {
        let result = f().await?;
        if is_done(&result) || attempt >= policy.max_retries {
            return Ok(result);
        }
        let sample: f64 = rand::random();
        let delay = policy.jittered_delay(attempt, sample);
        warn!(attempt, ?delay, "retrying chunk with unprocessed keys/items");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Throttled)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ConditionFailed) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
