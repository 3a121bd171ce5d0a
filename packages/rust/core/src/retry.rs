//! Retry with exponential backoff for external capability calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use readdo_shared::{ReaddoError, Result, RetryConfig};

use crate::shutdown::Shutdown;

/// How often and how patiently a failed call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry following failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// Only errors with [`ReaddoError::is_retryable`] are retried. Shutdown
    /// aborts both the in-flight call and the backoff sleep with
    /// [`ReaddoError::Cancelled`].
    pub async fn run<T, F, Fut>(&self, operation: &str, shutdown: &Shutdown, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            if shutdown.is_triggered() {
                return Err(ReaddoError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(ReaddoError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(ReaddoError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::shutdown;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_server_error_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_policy(3)
            .run("test", &Shutdown::never(), || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ReaddoError::http_status(503, "unavailable"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = fast_policy(3)
            .run("test", &Shutdown::never(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ReaddoError::http_status(400, "bad request"))
                }
            })
            .await;

        assert!(matches!(result, Err(ReaddoError::Upstream { status: Some(400), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = fast_policy(3)
            .run("test", &Shutdown::never(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ReaddoError::transport("connection refused"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let (trigger, signal) = shutdown::channel();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            policy.run("test", &signal, || async {
                Err(ReaddoError::http_status(500, "boom"))
            }),
        )
        .await
        .expect("backoff was interrupted");

        assert!(matches!(result, Err(ReaddoError::Cancelled)));
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_call() {
        let (trigger, signal) = shutdown::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            fast_policy(3).run("test", &signal, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .await
        .expect("call was aborted");

        assert!(matches!(result, Err(ReaddoError::Cancelled)));
    }
}
