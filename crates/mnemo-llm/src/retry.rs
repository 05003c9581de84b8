use std::future::Future;
use std::time::Duration;
use tracing::warn;

use mnemo_core::{MnemoError, Result};

/// Bounded exponential backoff for transient provider failures.
///
/// Delay before retry `n` (0-based) is `base_delay * 2^n`, unless the
/// provider sent a rate-limit hint. Hints never exceed the longest backoff
/// the policy would use on its own. Non-transient errors return immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Wait before retry `attempt` after `err`.
    pub fn delay_after(&self, err: &MnemoError, attempt: u32) -> Duration {
        match err.retry_after_secs().filter(|s| *s > 0) {
            Some(secs) => Duration::from_secs(secs).min(self.delay_for(self.max_retries)),
            None => self.delay_for(attempt),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_after(&e, attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let limited = |secs| MnemoError::RateLimited { retry_after_secs: secs };
        assert_eq!(policy.delay_after(&limited(86_400), 0), Duration::from_millis(800));
        assert_eq!(policy.delay_after(&limited(0), 1), Duration::from_millis(200));

        let patient = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(patient.delay_after(&limited(5), 0), Duration::from_secs(5));
        assert_eq!(
            patient.delay_after(&MnemoError::Timeout("slow".into()), 2),
            Duration::from_secs(8)
        );
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(MnemoError::Provider("HTTP 503".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MnemoError::Timeout("slow".into()))
            })
            .await;
        assert!(matches!(result, Err(MnemoError::Timeout(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MnemoError::DimensionMismatch { expected: 3, actual: 4 })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
