//! CoinGecko market data provider implementation.
//!
//! Primary crypto source, addressed by coin id ("bitcoin", "ethereum"):
//! - Quotes from /simple/price
//! - OHLC candles from /coins/{id}/ohlc
//! - Price-only series from /coins/{id}/market_chart
//!
//! Works keyless on the public tier; a pro key is sent as `x-cg-pro-api-key`.
//! API documentation: https://docs.coingecko.com/reference/introduction

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{MarketDataError, RetryPolicy};
use crate::models::{AssetClass, Candle, ProviderInstrument, Quote, QuoteContext, Resolution};
use crate::provider::http::{to_decimal, UpstreamClient};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PROVIDER_ID: &str = "COINGECKO";
const SOURCE: &str = "coingecko";

/// Day windows the OHLC endpoint accepts.
const DAY_BUCKETS: [u32; 7] = [1, 7, 14, 30, 90, 180, 365];

const SECONDS_PER_DAY: i64 = 86_400;

// ============================================================================
// Day Bucket
// ============================================================================

/// The `days` parameter of the OHLC and market chart endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OhlcDays {
    Days(u32),
    Max,
}

impl OhlcDays {
    /// Snap a time range up to the smallest accepted window that covers it.
    pub fn for_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let seconds = (end - start).num_seconds().max(0);
        // ceil((to - from) / 86400)
        let days = (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;

        DAY_BUCKETS
            .iter()
            .copied()
            .find(|bucket| i64::from(*bucket) >= days)
            .map(OhlcDays::Days)
            .unwrap_or(OhlcDays::Max)
    }
}

impl fmt::Display for OhlcDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{}", days),
            Self::Max => write!(f, "max"),
        }
    }
}

// ============================================================================
// API Response Structures
// ============================================================================

/// One coin entry of the /simple/price response, keyed by coin id
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
    usd_24h_vol: Option<f64>,
    /// Unix seconds
    last_updated_at: Option<i64>,
}

/// /coins/{id}/ohlc rows: [timestamp_ms, open, high, low, close]
type OhlcResponse = Vec<[f64; 5]>;

/// Response from /coins/{id}/market_chart
#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    /// [timestamp_ms, price]
    #[serde(default)]
    prices: Vec<[f64; 2]>,
}

// ============================================================================
// CoinGeckoProvider
// ============================================================================

/// CoinGecko provider. Always enabled.
pub struct CoinGeckoProvider {
    http: UpstreamClient,
    api_key: Option<String>,
}

impl CoinGeckoProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: UpstreamClient::new(PROVIDER_ID, BASE_URL, &Self::limits()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
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
            requests_per_minute: 30,
            max_concurrency: 3,
            min_delay: Duration::from_millis(500),
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Accept", "application/json".to_string())];
        if let Some(key) = &self.api_key {
            headers.push(("x-cg-pro-api-key", key.clone()));
        }
        headers
    }

    fn coin_id(instrument: &ProviderInstrument) -> Result<&str, MarketDataError> {
        match instrument {
            ProviderInstrument::CoinId { id } => Ok(&**id),
            _ => Err(MarketDataError::NotSupported {
                operation: "non coin-id instrument".to_string(),
                provider: PROVIDER_ID.to_string(),
            }),
        }
    }
}

// ============================================================================
// Response Mapping
// ============================================================================

fn quote_from_simple_price(
    canonical: &str,
    coin_id: &str,
    mut response: HashMap<String, SimplePrice>,
) -> Result<Quote, MarketDataError> {
    let coin = response.remove(coin_id).ok_or_else(|| MarketDataError::NoData {
        provider: PROVIDER_ID.to_string(),
    })?;

    let usd = coin.usd.unwrap_or(0.0);
    if usd <= 0.0 {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let timestamp = coin
        .last_updated_at
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);

    let price = to_decimal(usd);
    let change_percent = coin.usd_24h_change.map(to_decimal).unwrap_or(Decimal::ZERO);

    // Only a price is reported, so every day statistic collapses onto it
    let mut quote = Quote::flat(canonical, price, timestamp, SOURCE);
    quote.change = price * change_percent / Decimal::ONE_HUNDRED;
    quote.change_percent = change_percent;
    quote.volume = coin.usd_24h_vol.map(to_decimal).unwrap_or(Decimal::ZERO);
    Ok(quote)
}

fn timestamp_from_millis(ms: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms as i64).single()
}

fn candles_from_ohlc(rows: OhlcResponse) -> Result<Vec<Candle>, MarketDataError> {
    if rows.is_empty() {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let mut candles: Vec<Candle> = rows
        .into_iter()
        .filter_map(|[ts, open, high, low, close]| {
            let Some(time) = timestamp_from_millis(ts) else {
                warn!("Invalid OHLC timestamp: {}", ts);
                return None;
            };
            Some(Candle {
                time,
                open: to_decimal(open),
                high: to_decimal(high),
                low: to_decimal(low),
                close: to_decimal(close),
                volume: Decimal::ZERO,
            })
        })
        .collect();

    candles.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(candles)
}

fn candles_from_market_chart(response: MarketChartResponse) -> Result<Vec<Candle>, MarketDataError> {
    if response.prices.is_empty() {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let mut candles: Vec<Candle> = response
        .prices
        .into_iter()
        .filter_map(|[ts, price]| {
            timestamp_from_millis(ts).map(|time| Candle::from_price(time, to_decimal(price)))
        })
        .collect();

    candles.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(candles)
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            asset_classes: &[AssetClass::Crypto],
            supports_candles: true,
            supports_price_series: true,
        }
    }

    async fn get_latest_quote(
        &self,
        context: &QuoteContext,
        instrument: ProviderInstrument,
    ) -> Result<Quote, MarketDataError> {
        let coin_id = Self::coin_id(&instrument)?;

        debug!("Fetching simple price for {} from CoinGecko", coin_id);

        let params = [
            ("ids", coin_id.to_string()),
            ("vs_currencies", "usd".to_string()),
            ("include_24hr_change", "true".to_string()),
            ("include_24hr_vol", "true".to_string()),
            ("include_last_updated_at", "true".to_string()),
        ];
        let response: HashMap<String, SimplePrice> = self
            .http
            .get_json("/simple/price", &params, &self.headers(), "simple_price")
            .await?;

        quote_from_simple_price(&context.symbol, coin_id, response)
    }

    /// OHLC bars. CoinGecko picks the bar width from the day window, so
    /// `resolution` is not forwarded.
    async fn get_candles(
        &self,
        _context: &QuoteContext,
        instrument: ProviderInstrument,
        _resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let coin_id = Self::coin_id(&instrument)?;
        let days = OhlcDays::for_range(start, end);

        debug!("Fetching OHLC for {} ({} days) from CoinGecko", coin_id, days);

        let endpoint = format!("/coins/{}/ohlc", urlencoding::encode(coin_id));
        let params = [
            ("vs_currency", "usd".to_string()),
            ("days", days.to_string()),
        ];
        let rows: OhlcResponse = self
            .http
            .get_json(&endpoint, &params, &self.headers(), "ohlc")
            .await?;

        candles_from_ohlc(rows)
    }

    async fn get_price_series(
        &self,
        _context: &QuoteContext,
        instrument: ProviderInstrument,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let coin_id = Self::coin_id(&instrument)?;
        let days = OhlcDays::for_range(start, end);

        debug!(
            "Fetching market chart for {} ({} days) from CoinGecko",
            coin_id, days
        );

        let endpoint = format!("/coins/{}/market_chart", urlencoding::encode(coin_id));
        let params = [
            ("vs_currency", "usd".to_string()),
            ("days", days.to_string()),
        ];
        let response: MarketChartResponse = self
            .http
            .get_json(&endpoint, &params, &self.headers(), "market_chart")
            .await?;

        candles_from_market_chart(response)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn range(days: i64, extra_seconds: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = Utc.timestamp_opt(1_704_067_200, 0).unwrap();
        let start = end - ChronoDuration::days(days) - ChronoDuration::seconds(extra_seconds);
        (start, end)
    }

    #[test]
    fn test_day_bucket_snapping() {
        let (s, e) = range(1, 0);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Days(1));

        let (s, e) = range(1, 1);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Days(7));

        let (s, e) = range(60, 0);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Days(90));

        let (s, e) = range(365, 0);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Days(365));

        let (s, e) = range(5 * 365, 0);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Max);
        assert_eq!(OhlcDays::Max.to_string(), "max");
    }

    #[test]
    fn test_empty_range_uses_smallest_bucket() {
        let (s, e) = range(0, 0);
        assert_eq!(OhlcDays::for_range(s, e), OhlcDays::Days(1));
    }

    #[test]
    fn test_simple_price_mapping() {
        let json = r#"{
            "ethereum": {
                "usd": 3000,
                "usd_24h_change": 2.5,
                "usd_24h_vol": 15000000000,
                "last_updated_at": 1704067200
            }
        }"#;

        let response: HashMap<String, SimplePrice> = serde_json::from_str(json).unwrap();
        let quote = quote_from_simple_price("ETH-USD", "ethereum", response).unwrap();

        assert_eq!(quote.symbol, "ETH-USD");
        assert_eq!(quote.price, dec!(3000));
        assert_eq!(quote.change_percent, dec!(2.5));
        assert_eq!(quote.change, dec!(75));
        assert_eq!(quote.high, dec!(3000));
        assert_eq!(quote.previous_close, dec!(3000));
        assert_eq!(quote.volume, dec!(15000000000));
        assert_eq!(quote.source, "coingecko");
    }

    #[test]
    fn test_simple_price_missing_coin_is_no_data() {
        let response: HashMap<String, SimplePrice> = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            quote_from_simple_price("BTC-USD", "bitcoin", response),
            Err(MarketDataError::NoData { .. })
        ));
    }

    #[test]
    fn test_ohlc_mapping() {
        let json = "[[1704153600000, 43000.5, 43500, 42800, 43200], [1704067200000, 42000, 43100, 41900, 43000.5]]";
        let rows: OhlcResponse = serde_json::from_str(json).unwrap();
        let candles = candles_from_ohlc(rows).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time.timestamp(), 1_704_067_200);
        assert_eq!(candles[0].close, dec!(43000.5));
        assert_eq!(candles[1].high, dec!(43500));
        assert!(candles.iter().all(|c| c.volume.is_zero()));
    }

    #[test]
    fn test_market_chart_is_degraded_ohlc() {
        let json = r#"{"prices": [[1704067200000, 42000.25]], "market_caps": [], "total_volumes": []}"#;
        let response: MarketChartResponse = serde_json::from_str(json).unwrap();
        let candles = candles_from_market_chart(response).unwrap();

        assert_eq!(candles.len(), 1);
        let bar = &candles[0];
        assert_eq!(bar.open, dec!(42000.25));
        assert_eq!(bar.high, bar.open);
        assert_eq!(bar.low, bar.open);
        assert_eq!(bar.close, bar.open);
    }

    #[test]
    fn test_malformed_ohlc_row_fails_to_decode() {
        assert!(serde_json::from_str::<OhlcResponse>("[[1704067200000, 1.0]]").is_err());
    }

    #[test]
    fn test_pro_key_header() {
        let provider = CoinGeckoProvider::new(Some("cg-key".to_string()));
        let headers = provider.headers();
        assert!(headers.contains(&("x-cg-pro-api-key", "cg-key".to_string())));

        let keyless = CoinGeckoProvider::new(None);
        assert_eq!(keyless.headers().len(), 1);
        assert!(keyless.is_enabled());
    }
}
