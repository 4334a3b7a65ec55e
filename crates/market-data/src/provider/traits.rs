//! Market data provider trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::MarketDataError;
use crate::models::{Candle, ProviderInstrument, Quote, QuoteContext, Resolution};

use super::capabilities::ProviderCapabilities;

/// Trait for upstream market data providers.
///
/// Each implementation wraps one provider's endpoints and wire quirks. Providers receive
/// the instrument already translated into their native spelling; the canonical symbol
/// travels in the [`QuoteContext`] so results can be labelled with it.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketpulse_market_data::provider::{MarketDataProvider, ProviderCapabilities};
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             asset_classes: &[AssetClass::Equity],
///             supports_candles: false,
///             supports_price_series: false,
///         }
///     }
///
///     // ... implement get_latest_quote
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider ("FINNHUB", "POLYGON", ...).
    ///
    /// Used for logging, circuit breaker tracking and rate limiting.
    fn id(&self) -> &'static str;

    /// What the provider can serve. The cascade skips a provider whose asset classes
    /// do not include the requested one.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Whether the provider has what it needs (typically an API key) to be called.
    ///
    /// Disabled providers are skipped by the cascade without being invoked.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Fetch the latest quote for an instrument.
    async fn get_latest_quote(
        &self,
        context: &QuoteContext,
        instrument: ProviderInstrument,
    ) -> Result<Quote, MarketDataError>;

    /// Fetch OHLCV candles between `start` and `end`, ascending by time.
    async fn get_candles(
        &self,
        context: &QuoteContext,
        instrument: ProviderInstrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let _ = (context, instrument, resolution, start, end);
        Err(MarketDataError::NotSupported {
            operation: "candles".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Fetch a price-only series and present it as flat candles
    /// (open = high = low = close, zero volume).
    async fn get_price_series(
        &self,
        context: &QuoteContext,
        instrument: ProviderInstrument,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let _ = (context, instrument, start, end);
        Err(MarketDataError::NotSupported {
            operation: "price_series".to_string(),
            provider: self.id().to_string(),
        })
    }
}
