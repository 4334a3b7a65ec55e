//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider capabilities and rate limiting configuration
//! - The shared HTTP client every adapter sends requests through
//! - Concrete provider implementations (Finnhub, Polygon, CoinGecko)
//!
//! # Provider Resolution
//!
//! Providers receive pre-resolved `ProviderInstrument` parameters. Translating a
//! canonical symbol into provider spelling happens in the `symbols` module, not in
//! the providers themselves.

mod capabilities;
mod http;
mod traits;

pub mod coingecko;
pub mod finnhub;
pub mod polygon;

// Re-exports
pub use capabilities::{ProviderCapabilities, RateLimit};
pub use http::UpstreamClient;
pub use traits::MarketDataProvider;
