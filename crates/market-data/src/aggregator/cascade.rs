use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};

use crate::errors::{MarketDataError, RetryClass};
use crate::models::AssetClass;
use crate::provider::MarketDataProvider;
use crate::registry::CircuitBreaker;

struct Step<'a, T> {
    provider: &'static str,
    endpoint: Option<&'static str>,
    enabled: bool,
    serves_class: bool,
    call: BoxFuture<'a, Result<T, MarketDataError>>,
}

/// Ordered fallback across providers, first acceptable result wins.
///
/// Each step wraps one provider call that already carries its own retry policy; the
/// cascade never retries a step, it moves on. Steps are built lazily: a step's future
/// is only polled when every step before it failed, so a short-circuit leaves later
/// providers untouched.
///
/// Per step:
/// 1. Skip if the provider is disabled (missing API key)
/// 2. Skip if the provider's capabilities exclude the cascade's asset class
/// 3. Skip if the provider's circuit is open
/// 4. Await the call and run the acceptance check on its payload
/// 5. Record the outcome with the circuit breaker
pub struct Cascade<'a, T> {
    operation: &'static str,
    circuit_breaker: &'a CircuitBreaker,
    asset_class: AssetClass,
    steps: Vec<Step<'a, T>>,
}

impl<'a, T> Cascade<'a, T> {
    /// `operation` names the cascade in log context strings.
    pub fn new(
        operation: &'static str,
        circuit_breaker: &'a CircuitBreaker,
        asset_class: AssetClass,
    ) -> Self {
        Self {
            operation,
            circuit_breaker,
            asset_class,
            steps: Vec::new(),
        }
    }

    /// Append a step served by `provider`.
    pub fn step<F>(self, provider: &dyn MarketDataProvider, call: F) -> Self
    where
        F: Future<Output = Result<T, MarketDataError>> + Send + 'a,
    {
        self.push(provider, None, call)
    }

    /// Append a step for one specific endpoint of `provider`, for providers that appear
    /// more than once in a cascade.
    pub fn step_via<F>(self, provider: &dyn MarketDataProvider, endpoint: &'static str, call: F) -> Self
    where
        F: Future<Output = Result<T, MarketDataError>> + Send + 'a,
    {
        self.push(provider, Some(endpoint), call)
    }

    fn push<F>(mut self, provider: &dyn MarketDataProvider, endpoint: Option<&'static str>, call: F) -> Self
    where
        F: Future<Output = Result<T, MarketDataError>> + Send + 'a,
    {
        self.steps.push(Step {
            provider: provider.id(),
            endpoint,
            enabled: provider.is_enabled(),
            serves_class: provider
                .capabilities()
                .asset_classes
                .contains(&self.asset_class),
            call: call.boxed(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Walk the steps in order.
    ///
    /// `accept` decides whether a payload is usable; a rejection disqualifies that step
    /// only. Returns `None` when every step was skipped or failed.
    pub async fn run<A>(self, accept: A) -> Option<T>
    where
        A: Fn(T) -> Result<T, MarketDataError>,
    {
        let operation = self.operation;
        let circuit_breaker = self.circuit_breaker;
        let asset_class = self.asset_class;

        for step in self.steps {
            let context = match step.endpoint {
                Some(endpoint) => format!("DataAggregator.{}.{}.{}", operation, step.provider, endpoint),
                None => format!("DataAggregator.{}.{}", operation, step.provider),
            };

            if !step.enabled {
                debug!("{}: provider not configured, skipping", context);
                continue;
            }

            if !step.serves_class {
                debug!("{}: provider does not serve {:?}, skipping", context, asset_class);
                continue;
            }

            if !circuit_breaker.is_allowed(step.provider) {
                debug!("{}: circuit breaker open, skipping", context);
                continue;
            }

            match step.call.await.and_then(&accept) {
                Ok(value) => {
                    circuit_breaker.record_success(step.provider);
                    debug!("{}: served", context);
                    return Some(value);
                }
                Err(err) => {
                    warn!("{}: {}", context, describe(&err));
                    record_failure(circuit_breaker, step.provider, &err);
                }
            }
        }

        info!("DataAggregator.{}: cascade exhausted", operation);
        None
    }
}

/// Display text plus the retry flag for upstream failures.
fn describe(err: &MarketDataError) -> String {
    match err {
        MarketDataError::UpstreamError { retryable, .. } => {
            format!("{} (retryable: {})", err, retryable)
        }
        _ => err.to_string(),
    }
}

fn record_failure(circuit_breaker: &CircuitBreaker, provider: &str, err: &MarketDataError) {
    match err {
        MarketDataError::RateLimited { reset_at, .. } => {
            let cooldown = (*reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            circuit_breaker.open_for(provider, cooldown);
        }
        _ if err.retry_class() == RetryClass::WithBackoff => {
            circuit_breaker.record_failure(provider);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetClass, ProviderInstrument, Quote, QuoteContext};
    use crate::provider::ProviderCapabilities;
    use crate::registry::{CircuitBreakerConfig, CircuitState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        id: &'static str,
        enabled: bool,
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                asset_classes: &[AssetClass::Equity],
                supports_candles: false,
                supports_price_series: false,
            }
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn get_latest_quote(
            &self,
            _context: &QuoteContext,
            _instrument: ProviderInstrument,
        ) -> Result<Quote, MarketDataError> {
            Err(MarketDataError::NoData {
                provider: self.id.to_string(),
            })
        }
    }

    fn stub(id: &'static str) -> StubProvider {
        StubProvider { id, enabled: true }
    }

    fn accept_positive(value: i32) -> Result<i32, MarketDataError> {
        if value > 0 {
            Ok(value)
        } else {
            Err(MarketDataError::validation("value", value.to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let breaker = CircuitBreaker::new();
        let second_calls = AtomicUsize::new(0);
        let (first, second) = (stub("FIRST"), stub("SECOND"));

        let result = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&first, async { Ok(1) })
            .step(&second, async {
                second_calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .run(accept_positive)
            .await;

        assert_eq!(result, Some(1));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_payload_falls_through() {
        let breaker = CircuitBreaker::new();
        let (first, second) = (stub("FIRST"), stub("SECOND"));

        let result = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&first, async { Ok(0) })
            .step(&second, async { Ok(7) })
            .run(accept_positive)
            .await;

        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_all_failures_yield_none() {
        let breaker = CircuitBreaker::new();
        let (first, second) = (stub("FIRST"), stub("SECOND"));

        let result: Option<i32> = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&first, async {
                Err(MarketDataError::upstream("FIRST", 503, "unavailable"))
            })
            .step(&second, async { Err(MarketDataError::rate_limited("SECOND")) })
            .run(accept_positive)
            .await;

        assert_eq!(result, None);
        assert_eq!(breaker.failure_count("FIRST"), 1);
        assert_eq!(breaker.state("SECOND"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_never_polled() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicUsize::new(0);
        let disabled = StubProvider {
            id: "DISABLED",
            enabled: false,
        };
        let fallback = stub("FALLBACK");

        let result = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&disabled, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .step(&fallback, async { Ok(2) })
            .run(accept_positive)
            .await;

        assert_eq!(result, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_outside_asset_class_is_never_polled() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicUsize::new(0);
        let equity_only = stub("EQUITY_ONLY");
        let fallback = stub("FALLBACK");

        let result: Option<i32> = Cascade::new("test", &breaker, AssetClass::Crypto)
            .step(&equity_only, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .run(accept_positive)
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&fallback, async { Ok(2) })
            .run(accept_positive)
            .await;
        assert_eq!(result, Some(2));
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider() {
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        breaker.record_failure("FLAKY");
        let (flaky, fallback) = (stub("FLAKY"), stub("FALLBACK"));

        let result = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&flaky, async { Ok(1) })
            .step(&fallback, async { Ok(2) })
            .run(accept_positive)
            .await;

        assert_eq!(result, Some(2));
    }

    #[tokio::test]
    async fn test_no_data_does_not_penalize_provider() {
        let breaker = CircuitBreaker::new();
        let provider = stub("QUIET");

        let result: Option<i32> = Cascade::new("test", &breaker, AssetClass::Equity)
            .step(&provider, async {
                Err(MarketDataError::NoData {
                    provider: "QUIET".to_string(),
                })
            })
            .run(accept_positive)
            .await;

        assert_eq!(result, None);
        assert_eq!(breaker.failure_count("QUIET"), 0);
    }
}
