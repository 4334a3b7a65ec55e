use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};

type PendingMap<V> = HashMap<String, Shared<BoxFuture<'static, V>>>;

/// Coalesces concurrent calls that share a key into a single execution.
///
/// The first caller for a key starts `operation`; callers arriving while it is in flight
/// await the same shared future and observe the same value, errors included. The key is
/// removed the moment the execution settles, before any waiter sees the result, so the
/// next call with that key starts fresh.
pub struct RequestDeduplicator<V> {
    pending: Arc<Mutex<PendingMap<V>>>,
}

fn lock_pending<V>(pending: &Mutex<PendingMap<V>>) -> MutexGuard<'_, PendingMap<V>> {
    pending.lock().unwrap_or_else(|poisoned| {
        warn!("Deduplicator mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl<V> RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `operation` unless an execution for `key` is already in flight, in which case
    /// wait for that one instead.
    pub async fn deduplicate<F>(&self, key: &str, operation: F) -> V
    where
        F: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut pending = lock_pending(&self.pending);

            match pending.get(key) {
                Some(in_flight) => {
                    debug!("Dedup: joining in-flight request '{}'", key);
                    in_flight.clone()
                }
                None => {
                    let registry = Arc::clone(&self.pending);
                    let owned_key = key.to_string();
                    let execution = async move {
                        let value = operation.await;
                        lock_pending(&registry).remove(&owned_key);
                        value
                    }
                    .boxed()
                    .shared();

                    pending.insert(key.to_string(), execution.clone());
                    execution
                }
            }
        };

        shared.await
    }

    /// Number of keys with an execution in flight.
    pub fn in_flight(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Whether `key` currently has an execution in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        lock_pending(&self.pending).contains_key(key)
    }
}

impl<V> Default for RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::join_all;

    use crate::errors::MarketDataError;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_run_operation_once() {
        let dedup: RequestDeduplicator<Result<u32, MarketDataError>> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..10).map(|_| {
            let calls = calls.clone();
            dedup.deduplicate("quote:AAPL", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(7)));
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared_with_every_waiter() {
        let dedup: RequestDeduplicator<Result<u32, MarketDataError>> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..3).map(|_| {
            let calls = calls.clone();
            dedup.deduplicate("quote:BAD", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(MarketDataError::upstream("FINNHUB", 500, "boom"))
            })
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(
                result,
                Err(MarketDataError::upstream("FINNHUB", 500, "boom"))
            );
        }
    }

    #[tokio::test]
    async fn test_settled_key_starts_fresh_execution() {
        let dedup: RequestDeduplicator<usize> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let counter = calls.clone();
            let value = dedup
                .deduplicate("candles:BTC-USD:D:0:1", async move {
                    counter.fetch_add(1, Ordering::SeqCst) + 1
                })
                .await;
            assert_eq!(value, expected);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!dedup.is_pending("candles:BTC-USD:D:0:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let dedup: RequestDeduplicator<&'static str> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = calls.clone();
            dedup.deduplicate("quote:AAPL", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                "AAPL"
            })
        };
        let b = {
            let calls = calls.clone();
            dedup.deduplicate("quote:MSFT", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                "MSFT"
            })
        };

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), ("AAPL", "MSFT"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
