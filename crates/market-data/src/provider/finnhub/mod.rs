//! Finnhub market data provider implementation.
//!
//! Primary source for equities, and the bridge for two other asset classes:
//! - Equities via /quote and /stock/candle
//! - Crypto via exchange-qualified pairs ("BINANCE:BTCUSDT") on /quote and /crypto/candle
//! - Commodities and metals via OANDA codes ("OANDA:XAU_USD") on /quote and /forex/candle
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{MarketDataError, RetryPolicy};
use crate::models::{
    AssetClass, Candle, ProviderInstrument, Quote, QuoteContext, Resolution,
};
use crate::provider::http::{to_decimal, UpstreamClient};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

const SOURCE_EQUITY: &str = "finnhub";
const SOURCE_CRYPTO_BRIDGE: &str = "finnhub-binance";
const SOURCE_OANDA_BRIDGE: &str = "finnhub-oanda";

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price (0 for unknown symbols)
    c: Option<f64>,
    /// Change
    d: Option<f64>,
    /// Percent change
    dp: Option<f64>,
    /// High price of the day
    h: Option<f64>,
    /// Low price of the day
    l: Option<f64>,
    /// Open price of the day
    o: Option<f64>,
    /// Previous close
    pc: Option<f64>,
    /// Timestamp (Unix seconds)
    t: Option<i64>,
}

/// Response from the candle endpoints
#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
    /// Timestamps (Unix seconds)
    #[serde(default)]
    t: Vec<i64>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub market data provider.
///
/// Without an API key every call fails with [`MarketDataError::NotConfigured`].
pub struct FinnhubProvider {
    http: UpstreamClient,
    api_key: Option<String>,
}

impl FinnhubProvider {
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Self {
            http: UpstreamClient::new(PROVIDER_ID, BASE_URL, &Self::limits()),
            api_key,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.http = self.http.with_retry_policy(retry);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http = self.http.with_base_url(base_url);
        self
    }

    fn limits() -> RateLimit {
        RateLimit {
            requests_per_minute: 60, // Free tier limit
            max_concurrency: 5,
            min_delay: Duration::from_millis(100),
        }
    }

    fn auth_headers(&self) -> Result<[(&'static str, String); 1], MarketDataError> {
        match &self.api_key {
            Some(key) => Ok([("X-Finnhub-Token", key.clone())]),
            None => Err(MarketDataError::NotConfigured {
                provider: PROVIDER_ID.to_string(),
            }),
        }
    }

    /// Native symbol plus the source label results are tagged with.
    fn route(instrument: &ProviderInstrument) -> Result<(&str, &'static str), MarketDataError> {
        let source = match instrument {
            ProviderInstrument::EquitySymbol { .. } => SOURCE_EQUITY,
            ProviderInstrument::ExchangePair { .. } => SOURCE_CRYPTO_BRIDGE,
            ProviderInstrument::OandaSymbol { .. } => SOURCE_OANDA_BRIDGE,
            ProviderInstrument::CoinId { .. } => {
                return Err(MarketDataError::NotSupported {
                    operation: "coin_id".to_string(),
                    provider: PROVIDER_ID.to_string(),
                })
            }
        };
        Ok((instrument.native_symbol(), source))
    }

    fn candle_endpoint(instrument: &ProviderInstrument) -> &'static str {
        match instrument {
            ProviderInstrument::ExchangePair { .. } => "/crypto/candle",
            ProviderInstrument::OandaSymbol { .. } => "/forex/candle",
            _ => "/stock/candle",
        }
    }
}

// ============================================================================
// Response Mapping
// ============================================================================

fn quote_from_response(
    canonical: &str,
    response: QuoteResponse,
    source: &str,
) -> Result<Quote, MarketDataError> {
    // Finnhub answers unknown symbols with a zeroed payload instead of an error
    let price = response.c.unwrap_or(0.0);
    if price <= 0.0 {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let timestamp = response
        .t
        .filter(|ts| *ts > 0)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);

    let field = |v: Option<f64>| v.map(to_decimal).unwrap_or(Decimal::ZERO);

    Ok(Quote {
        symbol: canonical.to_string(),
        price: to_decimal(price),
        change: field(response.d),
        change_percent: field(response.dp),
        high: field(response.h),
        low: field(response.l),
        open: field(response.o),
        previous_close: field(response.pc),
        volume: Decimal::ZERO, // /quote endpoint doesn't provide volume
        timestamp,
        source: source.to_string(),
    })
}

fn candles_from_response(response: CandleResponse) -> Result<Vec<Candle>, MarketDataError> {
    if response.s != "ok" || response.t.is_empty() {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let len = response.t.len();
    if response.c.len() != len
        || response.o.len() != len
        || response.h.len() != len
        || response.l.len() != len
    {
        return Err(MarketDataError::validation(
            "candles",
            format!(
                "mismatched array lengths: t={} o={} h={} l={} c={}",
                len,
                response.o.len(),
                response.h.len(),
                response.l.len(),
                response.c.len()
            ),
        ));
    }

    let mut candles = Vec::with_capacity(len);
    for i in 0..len {
        let time = match Utc.timestamp_opt(response.t[i], 0).single() {
            Some(ts) => ts,
            None => {
                warn!("Invalid timestamp at index {}: {}", i, response.t[i]);
                continue;
            }
        };

        candles.push(Candle {
            time,
            open: to_decimal(response.o[i]),
            high: to_decimal(response.h[i]),
            low: to_decimal(response.l[i]),
            close: to_decimal(response.c[i]),
            volume: response.v.get(i).copied().map(to_decimal).unwrap_or(Decimal::ZERO),
        });
    }

    candles.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(candles)
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            asset_classes: &[
                AssetClass::Equity,
                AssetClass::Crypto,
                AssetClass::CommodityOrMetal,
            ],
            supports_candles: true,
            supports_price_series: false,
        }
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_latest_quote(
        &self,
        context: &QuoteContext,
        instrument: ProviderInstrument,
    ) -> Result<Quote, MarketDataError> {
        let headers = self.auth_headers()?;
        let (symbol, source) = Self::route(&instrument)?;

        debug!("Fetching latest quote for {} from Finnhub", symbol);

        let response: QuoteResponse = self
            .http
            .get_json("/quote", &[("symbol", symbol.to_string())], &headers, "quote")
            .await?;

        quote_from_response(&context.symbol, response, source)
    }

    async fn get_candles(
        &self,
        _context: &QuoteContext,
        instrument: ProviderInstrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let headers = self.auth_headers()?;
        let (symbol, _) = Self::route(&instrument)?;
        let endpoint = Self::candle_endpoint(&instrument);

        debug!(
            "Fetching {} candles for {} from {} to {} from Finnhub",
            resolution,
            symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let params = [
            ("symbol", symbol.to_string()),
            ("resolution", resolution.as_str().to_string()),
            ("from", start.timestamp().to_string()),
            ("to", end.timestamp().to_string()),
        ];
        let response: CandleResponse = self
            .http
            .get_json(endpoint, &params, &headers, "candles")
            .await?;

        candles_from_response(response)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn test_provider_id_and_limits() {
        let provider = FinnhubProvider::new(Some("test_key".to_string()));
        assert_eq!(provider.id(), "FINNHUB");
        assert_eq!(FinnhubProvider::limits().requests_per_minute, 60);
        assert!(provider.is_enabled());
    }

    #[test]
    fn test_blank_key_disables_provider() {
        assert!(!FinnhubProvider::new(None).is_enabled());
        assert!(!FinnhubProvider::new(Some("  ".to_string())).is_enabled());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let provider = FinnhubProvider::new(None);
        let context = QuoteContext::new("AAPL", AssetClass::Equity);
        let instrument = ProviderInstrument::EquitySymbol {
            symbol: Arc::from("AAPL"),
        };

        let err = provider
            .get_latest_quote(&context, instrument)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::NotConfigured { .. }));
    }

    #[test]
    fn test_route_source_labels() {
        let pair = ProviderInstrument::ExchangePair {
            symbol: Arc::from("BINANCE:BTCUSDT"),
        };
        assert_eq!(
            FinnhubProvider::route(&pair).unwrap(),
            ("BINANCE:BTCUSDT", "finnhub-binance")
        );

        let oanda = ProviderInstrument::OandaSymbol {
            symbol: Arc::from("OANDA:XAU_USD"),
        };
        assert_eq!(
            FinnhubProvider::route(&oanda).unwrap(),
            ("OANDA:XAU_USD", "finnhub-oanda")
        );
        assert_eq!(FinnhubProvider::candle_endpoint(&oanda), "/forex/candle");
    }

    #[test]
    fn test_quote_mapping() {
        let json = r#"{
            "c": 150.25,
            "d": 1.5,
            "dp": 1.01,
            "h": 152.00,
            "l": 148.50,
            "o": 149.00,
            "pc": 148.75,
            "t": 1704067200
        }"#;

        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        let quote = quote_from_response("AAPL", response, SOURCE_EQUITY).unwrap();

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(150.25));
        assert_eq!(quote.change, dec!(1.5));
        assert_eq!(quote.high, dec!(152));
        assert_eq!(quote.previous_close, dec!(148.75));
        assert_eq!(quote.volume, Decimal::ZERO);
        assert_eq!(quote.timestamp.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(quote.source, "finnhub");
    }

    #[test]
    fn test_zero_price_is_no_data() {
        let json = r#"{"c": 0, "d": null, "dp": null, "h": 0, "l": 0, "o": 0, "pc": 0, "t": 0}"#;
        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        let err = quote_from_response("NOPE", response, SOURCE_EQUITY).unwrap_err();
        assert!(matches!(err, MarketDataError::NoData { .. }));
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let json = r#"{"c": 2350.5}"#;
        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        let before = Utc::now();
        let quote = quote_from_response("GC=F", response, SOURCE_OANDA_BRIDGE).unwrap();
        assert!(quote.timestamp >= before);
        assert_eq!(quote.source, "finnhub-oanda");
    }

    #[test]
    fn test_candle_mapping_keeps_order_and_fields() {
        let json = r#"{
            "s": "ok",
            "c": [150.0, 151.0, 152.0],
            "h": [151.0, 152.0, 153.0],
            "l": [149.0, 150.0, 151.0],
            "o": [149.5, 150.5, 151.5],
            "v": [1000000, 1100000, 1200000],
            "t": [1704067200, 1704153600, 1704240000]
        }"#;

        let response: CandleResponse = serde_json::from_str(json).unwrap();
        let candles = candles_from_response(response).unwrap();

        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
        assert_eq!(candles[0].open, dec!(149.5));
        assert_eq!(candles[2].close, dec!(152));
        assert_eq!(candles[1].volume, dec!(1100000));
    }

    #[test]
    fn test_candle_no_data() {
        let response: CandleResponse = serde_json::from_str(r#"{"s": "no_data"}"#).unwrap();
        assert!(matches!(
            candles_from_response(response),
            Err(MarketDataError::NoData { .. })
        ));
    }

    #[test]
    fn test_candle_mismatched_lengths_is_validation_error() {
        let json = r#"{"s": "ok", "c": [1.0], "h": [1.0, 2.0], "l": [1.0], "o": [1.0], "t": [1704067200]}"#;
        let response: CandleResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            candles_from_response(response),
            Err(MarketDataError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_non_conforming_payload_fails_to_decode() {
        let result = serde_json::from_str::<CandleResponse>(r#"{"c": [1.0]}"#);
        assert!(result.is_err());
    }
}
