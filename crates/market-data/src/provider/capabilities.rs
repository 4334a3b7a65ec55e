//! Provider capabilities and rate limiting configuration.

use std::time::Duration;

use crate::models::AssetClass;

/// Describes what a market data provider can serve.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Asset classes this provider can quote.
    pub asset_classes: &'static [AssetClass],

    /// Whether the provider serves OHLCV candles.
    pub supports_candles: bool,

    /// Whether the provider serves a price-only series usable as degraded candles.
    pub supports_price_series: bool,
}

/// Rate limiting configuration for a provider.
///
/// Controls how aggressively we can call a provider to avoid
/// hitting their rate limits and getting blocked.
#[derive(Clone, Debug)]
pub struct RateLimit {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,

    /// Maximum burst of back-to-back requests.
    pub max_concurrency: usize,

    /// Minimum delay between requests.
    pub min_delay: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_concurrency: 5,
            min_delay: Duration::from_millis(100),
        }
    }
}
