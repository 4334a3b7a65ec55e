//! Multi-source quote and candle aggregation.
//!
//! [`DataAggregator`] is the read path every collaborator goes through. A request is:
//! 1. normalized and keyed from its full argument tuple
//! 2. deduplicated against identical in-flight requests
//! 3. served from the TTL cache when fresh
//! 4. otherwise resolved by a fixed, asset-class specific [`Cascade`] of providers
//!
//! | Asset class | Quote cascade | Candle cascade |
//! |-------------|---------------|----------------|
//! | Equity | primary → secondary | primary → secondary |
//! | Crypto | coin data (mapped coins only) → primary exchange-pair bridge | OHLC → price series (mapped coins only) |
//! | Commodity / metal | primary OANDA bridge | primary OANDA bridge |
//!
//! Missing data is never an error: an exhausted cascade yields `None` or an empty series.
//! Only arguments that can never succeed (empty symbol, inverted range) are rejected.

mod cascade;

pub use cascade::Cascade;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::cache::{RequestDeduplicator, TtlCache};
use crate::errors::{MarketDataError, RetryPolicy};
use crate::models::{AssetClass, Candle, Quote, QuoteContext, Resolution};
use crate::provider::coingecko::CoinGeckoProvider;
use crate::provider::finnhub::FinnhubProvider;
use crate::provider::polygon::PolygonProvider;
use crate::provider::MarketDataProvider;
use crate::registry::{CircuitBreaker, CircuitBreakerConfig, QuoteValidator};
use crate::symbols;

/// Freshness window for quotes.
const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(1);

/// Freshness window for candle series.
const DEFAULT_CANDLE_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Configuration
// ============================================================================

/// API keys for the upstream providers. Absent keys disable the matching steps.
#[derive(Clone, Debug, Default)]
pub struct ProviderKeys {
    pub finnhub: Option<String>,
    pub polygon: Option<String>,
    pub coingecko: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub quote_ttl: Duration,
    pub candle_ttl: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            quote_ttl: DEFAULT_QUOTE_TTL,
            candle_ttl: DEFAULT_CANDLE_TTL,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// The providers a [`DataAggregator`] walks, by role.
#[derive(Clone)]
pub struct AggregatorProviders {
    /// Realtime equity provider; also bridges crypto pairs and OANDA commodities.
    pub equity_primary: Arc<dyn MarketDataProvider>,
    /// Optional equity fallback.
    pub equity_secondary: Arc<dyn MarketDataProvider>,
    /// Crypto market data addressed by coin id.
    pub crypto_data: Arc<dyn MarketDataProvider>,
}

impl AggregatorProviders {
    /// Finnhub, Polygon and CoinGecko adapters built from `keys`.
    pub fn from_keys(keys: &ProviderKeys, retry: &RetryPolicy) -> Self {
        Self {
            equity_primary: Arc::new(
                FinnhubProvider::new(keys.finnhub.clone()).with_retry_policy(retry.clone()),
            ),
            equity_secondary: Arc::new(
                PolygonProvider::new(keys.polygon.clone()).with_retry_policy(retry.clone()),
            ),
            crypto_data: Arc::new(
                CoinGeckoProvider::new(keys.coingecko.clone()).with_retry_policy(retry.clone()),
            ),
        }
    }
}

// ============================================================================
// DataAggregator
// ============================================================================

#[derive(Clone, Debug)]
enum CachedData {
    Quote(Quote),
    Candles(Vec<Candle>),
}

struct AggregatorInner {
    providers: AggregatorProviders,
    circuit_breaker: CircuitBreaker,
    validator: QuoteValidator,
    cache: TtlCache<CachedData>,
    quote_requests: RequestDeduplicator<Option<Quote>>,
    candle_requests: RequestDeduplicator<Vec<Candle>>,
    config: AggregatorConfig,
}

/// Cached, deduplicated, multi-provider quote and candle source.
///
/// Cheap to clone; clones share cache, in-flight requests and circuit state.
#[derive(Clone)]
pub struct DataAggregator {
    inner: Arc<AggregatorInner>,
}

impl DataAggregator {
    pub fn new(providers: AggregatorProviders, config: AggregatorConfig) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                providers,
                circuit_breaker: CircuitBreaker::with_config(config.circuit_breaker.clone()),
                validator: QuoteValidator::new(),
                cache: TtlCache::new(),
                quote_requests: RequestDeduplicator::new(),
                candle_requests: RequestDeduplicator::new(),
                config,
            }),
        }
    }

    /// Aggregator over the production adapters.
    pub fn from_keys(keys: &ProviderKeys, retry: &RetryPolicy, config: AggregatorConfig) -> Self {
        Self::new(AggregatorProviders::from_keys(keys, retry), config)
    }

    /// Latest quote for `symbol`, or `None` when no provider could serve it.
    pub async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>, MarketDataError> {
        let symbol = symbols::normalize(symbol);
        if symbol.is_empty() {
            return Err(MarketDataError::InvalidArgument(
                "symbol is required".to_string(),
            ));
        }

        let key = format!("quote:{}", symbol);
        let inner = Arc::clone(&self.inner);
        let cache_key = key.clone();

        Ok(self
            .inner
            .quote_requests
            .deduplicate(&key, async move { inner.load_quote(&cache_key, &symbol).await })
            .await)
    }

    /// Candles for `symbol` between `from` and `to` (epoch seconds), ascending by time.
    /// Empty when no provider could serve the range.
    pub async fn get_candles(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let symbol = symbols::normalize(symbol);
        if symbol.is_empty() {
            return Err(MarketDataError::InvalidArgument(
                "symbol is required".to_string(),
            ));
        }
        if from > to {
            return Err(MarketDataError::InvalidArgument(format!(
                "from ({}) is after to ({})",
                from, to
            )));
        }
        let start = epoch_seconds(from)?;
        let end = epoch_seconds(to)?;

        let key = format!("candles:{}:{}:{}:{}", symbol, resolution, from, to);
        let inner = Arc::clone(&self.inner);
        let cache_key = key.clone();

        Ok(self
            .inner
            .candle_requests
            .deduplicate(&key, async move {
                inner
                    .load_candles(&cache_key, &symbol, resolution, start, end)
                    .await
            })
            .await)
    }

    /// Number of distinct requests currently being resolved upstream.
    pub fn in_flight(&self) -> usize {
        self.inner.quote_requests.in_flight() + self.inner.candle_requests.in_flight()
    }

    /// Circuit breaker shared by every cascade of this aggregator.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.circuit_breaker
    }

    /// Drop every cached quote and candle series.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }
}

fn epoch_seconds(ts: i64) -> Result<DateTime<Utc>, MarketDataError> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| MarketDataError::InvalidArgument(format!("timestamp out of range: {}", ts)))
}

impl AggregatorInner {
    async fn load_quote(&self, key: &str, symbol: &str) -> Option<Quote> {
        if let Some(CachedData::Quote(quote)) = self.cache.get(key, self.config.quote_ttl) {
            debug!("Cache hit for {}", key);
            return Some(quote);
        }

        let quote = match symbols::classify(symbol) {
            AssetClass::Crypto => self.crypto_quote(symbol).await,
            AssetClass::CommodityOrMetal => self.commodity_quote(symbol).await,
            AssetClass::Equity => self.equity_quote(symbol).await,
        };

        if let Some(quote) = &quote {
            self.cache.set(key, CachedData::Quote(quote.clone()));
        }
        quote
    }

    async fn load_candles(
        &self,
        key: &str,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Candle> {
        if let Some(CachedData::Candles(candles)) = self.cache.get(key, self.config.candle_ttl) {
            debug!("Cache hit for {}", key);
            return candles;
        }

        let candles = match symbols::classify(symbol) {
            AssetClass::Crypto => self.crypto_candles(symbol, start, end).await,
            AssetClass::CommodityOrMetal => {
                self.commodity_candles(symbol, resolution, start, end).await
            }
            AssetClass::Equity => self.equity_candles(symbol, resolution, start, end).await,
        }
        .unwrap_or_default();

        if !candles.is_empty() {
            self.cache.set(key, CachedData::Candles(candles.clone()));
        }
        candles
    }

    // ========================================================================
    // Acceptance
    // ========================================================================

    fn accept_quote(&self, quote: Quote) -> Result<Quote, MarketDataError> {
        self.validator.validate_quote(&quote)?;
        Ok(quote)
    }

    fn accept_candles(&self, candles: Vec<Candle>) -> Result<Vec<Candle>, MarketDataError> {
        let candles = self.validator.validate_series(candles)?;
        if candles.is_empty() {
            return Err(MarketDataError::validation("candles", "empty series"));
        }
        Ok(candles)
    }

    // ========================================================================
    // Quote cascades
    // ========================================================================

    async fn equity_quote(&self, symbol: &str) -> Option<Quote> {
        let context = QuoteContext::new(symbol, AssetClass::Equity);
        let primary = self.providers.equity_primary.as_ref();
        let secondary = self.providers.equity_secondary.as_ref();

        Cascade::new("equity_quote", &self.circuit_breaker, context.asset_class)
            .step(
                primary,
                primary.get_latest_quote(&context, symbols::equity_instrument(symbol)),
            )
            .step(
                secondary,
                secondary.get_latest_quote(&context, symbols::equity_instrument(symbol)),
            )
            .run(|quote| self.accept_quote(quote))
            .await
    }

    async fn crypto_quote(&self, symbol: &str) -> Option<Quote> {
        let context = QuoteContext::new(symbol, AssetClass::Crypto);
        let crypto = self.providers.crypto_data.as_ref();
        let bridge = self.providers.equity_primary.as_ref();

        let mut cascade = Cascade::new("crypto_quote", &self.circuit_breaker, context.asset_class);
        if let Some(coin) = symbols::coin_instrument(symbol) {
            cascade = cascade.step(crypto, crypto.get_latest_quote(&context, coin));
        }

        cascade
            .step(
                bridge,
                bridge.get_latest_quote(&context, symbols::exchange_pair_instrument(symbol)),
            )
            .run(|quote| self.accept_quote(quote))
            .await
    }

    async fn commodity_quote(&self, symbol: &str) -> Option<Quote> {
        let context = QuoteContext::new(symbol, AssetClass::CommodityOrMetal);
        let bridge = self.providers.equity_primary.as_ref();

        Cascade::new("commodity_quote", &self.circuit_breaker, context.asset_class)
            .step(
                bridge,
                bridge.get_latest_quote(&context, symbols::oanda_instrument(symbol)),
            )
            .run(|quote| self.accept_quote(quote))
            .await
    }

    // ========================================================================
    // Candle cascades
    // ========================================================================

    async fn equity_candles(
        &self,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<Candle>> {
        let context = QuoteContext::new(symbol, AssetClass::Equity);
        let primary = self.providers.equity_primary.as_ref();
        let secondary = self.providers.equity_secondary.as_ref();

        Cascade::new("equity_candles", &self.circuit_breaker, context.asset_class)
            .step(
                primary,
                primary.get_candles(
                    &context,
                    symbols::equity_instrument(symbol),
                    resolution,
                    start,
                    end,
                ),
            )
            .step(
                secondary,
                secondary.get_candles(
                    &context,
                    symbols::equity_instrument(symbol),
                    resolution,
                    start,
                    end,
                ),
            )
            .run(|candles| self.accept_candles(candles))
            .await
    }

    async fn crypto_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<Candle>> {
        let Some(coin) = symbols::coin_instrument(symbol) else {
            debug!("No coin id mapping for {}, no candle source", symbol);
            return None;
        };

        let context = QuoteContext::new(symbol, AssetClass::Crypto);
        let crypto = self.providers.crypto_data.as_ref();

        // The OHLC endpoint chooses its own bar width from the day window
        Cascade::new("crypto_candles", &self.circuit_breaker, context.asset_class)
            .step_via(
                crypto,
                "ohlc",
                crypto.get_candles(&context, coin.clone(), Resolution::Daily, start, end),
            )
            .step_via(
                crypto,
                "chart",
                crypto.get_price_series(&context, coin, start, end),
            )
            .run(|candles| self.accept_candles(candles))
            .await
    }

    async fn commodity_candles(
        &self,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<Candle>> {
        let context = QuoteContext::new(symbol, AssetClass::CommodityOrMetal);
        let bridge = self.providers.equity_primary.as_ref();

        Cascade::new("commodity_candles", &self.circuit_breaker, context.asset_class)
            .step(
                bridge,
                bridge.get_candles(
                    &context,
                    symbols::oanda_instrument(symbol),
                    resolution,
                    start,
                    end,
                ),
            )
            .run(|candles| self.accept_candles(candles))
            .await
    }
}
