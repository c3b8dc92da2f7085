//! Bounded retry with a fixed delay between attempts.
//!
//! Every network call in the relay goes through [`retry`]. The delay is
//! deliberately flat rather than exponential: this is small, bounded
//! control-plane traffic, and a stream that cannot reach its endpoint
//! within a handful of seconds is failed rather than nursed along.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempt budget and inter-attempt delay for one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is exhausted.
///
/// On exhaustion the last error is returned to the caller. `action` is a
/// short human-readable label used in the per-attempt logs.
pub async fn retry<T, E, F, Fut>(action: &str, policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt < policy.max_attempts {
                    warn!(
                        action,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "operation failed, retrying after delay"
                    );
                    tokio::time::sleep(policy.delay).await;
                } else {
                    warn!(
                        action,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "operation failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry("test op", quick_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = retry("test op", quick_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("boom {n}"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry("test op", quick_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("boom {n}")) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_between_attempts_is_fixed() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = retry("test op", quick_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        // Two sleeps between three attempts, 1s each, no backoff growth.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let start = tokio::time::Instant::now();
        let result: Result<(), &str> = retry("test op", quick_policy(1), || async { Err("nope") }).await;
        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
