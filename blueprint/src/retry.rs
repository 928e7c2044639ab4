//! Retry with exponential backoff for transient operations

use std::future::Future;
use std::time::Duration;

/// Backoff policy for retried operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        (self.base_delay * multiplier).min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// The last error is returned after exhaustion. `describe` names the
/// operation in retry logs.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    describe: &str,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} attempt(s)", describe, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if attempt >= policy.max_attempts {
                    tracing::error!("{} failed after {} attempts: {}", describe, attempt, e);
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}...",
                    describe,
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(
            6,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));

        let result: Result<u32, String> = with_backoff(&policy, "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));

        let result: Result<(), String> =
            with_backoff(&policy, "doomed op", || async { Err("down".to_string()) }).await;

        assert_eq!(result.unwrap_err(), "down");
    }
}
