use std::future::Future;
use std::time::Duration;

use log::debug;

use super::MarketDataError;

/// Default number of attempts for a single upstream call.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles on every further attempt.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Deadline applied to each individual attempt.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Classification for retry policy.
///
/// Retrying the same provider and falling back to another provider are two separate
/// decisions: [`RetryPolicy`] acts on `WithBackoff`, the aggregator cascade acts on the rest.
///
/// # Behavior Summary
///
/// | Class | Retry same provider? | Try next provider? |
/// |-------|---------------------|-------------------|
/// | `Never` | No | No |
/// | `WithBackoff` | Yes, until attempts run out | Yes, afterwards |
/// | `NextProvider` | No | Yes |
/// | `CircuitOpen` | No | Yes (skip this one) |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - the request is invalid and no provider can satisfy it.
    Never,

    /// Transient failure (5xx, transport error, deadline exceeded).
    /// Retry the same call after an exponentially growing delay.
    WithBackoff,

    /// This provider can't serve the request (rate limited, bad payload, no data,
    /// missing key) but another provider might.
    NextProvider,

    /// Circuit breaker is open for this provider.
    CircuitOpen,
}

/// Bounded exponential backoff wrapped around one upstream call.
///
/// Attempt `n` (1-based) that fails with a [`RetryClass::WithBackoff`] error is followed by a
/// delay of `base_delay * 2^(n-1)`. Every other error is returned immediately. When
/// `call_timeout` is set, each attempt is raced against it and a miss becomes
/// [`MarketDataError::Timeout`], which is itself retryable.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Race `call` against `call_timeout`, if any. A miss becomes [`MarketDataError::Timeout`].
    pub async fn within_deadline<T, Fut>(&self, provider: &str, call: Fut) -> Result<T, MarketDataError>
    where
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        match self.call_timeout {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .unwrap_or_else(|_| {
                    Err(MarketDataError::Timeout {
                        provider: provider.to_string(),
                    })
                }),
            None => call.await,
        }
    }

    /// Run `operation` under this policy.
    ///
    /// `provider` is only used for the timeout error and log lines.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut operation: F) -> Result<T, MarketDataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.within_deadline(provider, operation()).await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.retry_class() == RetryClass::WithBackoff && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Retry: attempt {}/{} for '{}' failed ({}), retrying in {:?}",
                        attempt, max_attempts, provider, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run `operation` with the default policy (3 attempts, 1 s base delay, 10 s per-call deadline).
pub async fn with_retry<T, F, Fut>(provider: &str, operation: F) -> Result<T, MarketDataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MarketDataError>>,
{
    RetryPolicy::default().run(provider, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_retried_until_attempts_run_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<(), _> = with_retry("FINNHUB", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(MarketDataError::upstream("FINNHUB", 503, "unavailable"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second, none after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = with_retry("POLYGON", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(MarketDataError::upstream("POLYGON", 0, "connection reset"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_propagate_immediately() {
        for error in [
            MarketDataError::rate_limited("FINNHUB"),
            MarketDataError::validation("quote", "not json"),
            MarketDataError::upstream("FINNHUB", 404, "Not Found"),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let expected = error.clone();

            let result: Result<(), _> = with_retry("FINNHUB", || {
                let counter = counter.clone();
                let error = error.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(error)
                }
            })
            .await;

            assert_eq!(result, Err(expected));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_becomes_timeout_error() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(10),
            call_timeout: Some(Duration::from_secs(5)),
        };

        let result: Result<(), _> = policy
            .run("COINGECKO", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert_eq!(
            result,
            Err(MarketDataError::Timeout {
                provider: "COINGECKO".to_string()
            })
        );
    }
}
