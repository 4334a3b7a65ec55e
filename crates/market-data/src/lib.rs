//! MarketPulse Market Data Crate
//!
//! This crate provides multi-source quote and candle fetching for stocks,
//! cryptocurrencies, commodities and metals.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple asset classes: equities, crypto, commodities and metals
//! - Multiple providers: Finnhub, Polygon, CoinGecko
//! - A fixed per-asset-class fallback cascade across providers
//! - Read-through TTL caching and in-flight request deduplication
//! - Retry with backoff, rate limiting and circuit breaking per provider
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |    Collaborator  | --> |  DataAggregator  |  (normalize, key)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   Deduplicator   |  (one execution per key)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    TtlCache      |  (1 s quotes, 5 min candles)
//!                          +------------------+
//!                                  |  miss
//!                                  v
//!                          +------------------+
//!                          |     Cascade      |  (classify, provider order)
//!                          +------------------+
//!                                  |
//!                                  v
//!                         +-------------------+
//!                         | ProviderInstrument|  (provider spelling)
//!                         +-------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    Provider      |  (retry, rate limit, HTTP)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`DataAggregator`] - Entry point: `get_quote` and `get_candles`
//! - [`Quote`] - Point-in-time price with day statistics
//! - [`Candle`] - One OHLCV bar
//! - [`AssetClass`] - Equity, crypto, or commodity/metal
//! - [`ProviderInstrument`] - Provider-specific lookup parameters
//! - [`MarketDataError`] - Error taxonomy with retry classification

pub mod aggregator;
pub mod cache;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod symbols;

// Re-export all public types from models
pub use models::{
    AssetClass, Candle, ProviderInstrument, ProviderSymbol, Quote, QuoteContext,
    Resolution,
};

// Re-export aggregator types
pub use aggregator::{
    AggregatorConfig, AggregatorProviders, Cascade, DataAggregator, ProviderKeys,
};

// Re-export cache primitives
pub use cache::{RequestDeduplicator, TtlCache};

// Re-export provider types
pub use provider::coingecko::{CoinGeckoProvider, OhlcDays};
pub use provider::finnhub::FinnhubProvider;
pub use provider::polygon::PolygonProvider;
pub use provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

// Re-export registry types
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, QuoteValidator, RateLimitConfig,
    RateLimiter,
};

// Re-export error types
pub use errors::{with_retry, MarketDataError, RetryClass, RetryPolicy};
