//! Polygon.io market data provider implementation.
//!
//! Secondary equity source, used only when an API key is configured:
//! - Quotes from the single-ticker snapshot endpoint
//! - Candles from the aggregates (bars) endpoint
//!
//! Free tier is limited to 5 API calls per minute.
//! API documentation: https://polygon.io/docs/stocks

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{MarketDataError, RetryPolicy};
use crate::models::{AssetClass, Candle, ProviderInstrument, Quote, QuoteContext, Resolution};
use crate::provider::http::{to_decimal, UpstreamClient};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://api.polygon.io";
const PROVIDER_ID: &str = "POLYGON";
const SOURCE: &str = "polygon";

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /v2/snapshot/locale/us/markets/stocks/tickers/{ticker}
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: Option<TickerSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerSnapshot {
    #[serde(default)]
    todays_change: f64,
    #[serde(default)]
    todays_change_perc: f64,
    #[serde(default)]
    day: Bar,
    #[serde(default)]
    prev_day: Bar,
    last_trade: Option<LastTrade>,
    /// Nanoseconds since epoch
    #[serde(default)]
    updated: i64,
}

/// Day bar inside a snapshot. Polygon zeroes it outside trading hours.
#[derive(Debug, Default, Deserialize)]
struct Bar {
    #[serde(default)]
    o: f64,
    #[serde(default)]
    h: f64,
    #[serde(default)]
    l: f64,
    #[serde(default)]
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct LastTrade {
    p: f64,
}

/// Response from /v2/aggs/ticker/{ticker}/range/...
#[derive(Debug, Deserialize)]
struct AggregatesResponse {
    #[serde(default)]
    results: Vec<AggregateBar>,
}

#[derive(Debug, Deserialize)]
struct AggregateBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
    /// Bucket start in milliseconds
    t: i64,
}

// ============================================================================
// PolygonProvider
// ============================================================================

/// Polygon.io provider. Disabled unless constructed with a non-empty key.
pub struct PolygonProvider {
    http: UpstreamClient,
    api_key: Option<String>,
}

impl PolygonProvider {
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
            requests_per_minute: 5, // Free tier limit
            max_concurrency: 1,
            min_delay: Duration::from_secs(12),
        }
    }

    fn api_key(&self) -> Result<&str, MarketDataError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| MarketDataError::NotConfigured {
                provider: PROVIDER_ID.to_string(),
            })
    }

    fn ticker(instrument: &ProviderInstrument) -> Result<&str, MarketDataError> {
        match instrument {
            ProviderInstrument::EquitySymbol { symbol } => Ok(&**symbol),
            _ => Err(MarketDataError::NotSupported {
                operation: "non-equity instrument".to_string(),
                provider: PROVIDER_ID.to_string(),
            }),
        }
    }
}

// ============================================================================
// Response Mapping
// ============================================================================

fn quote_from_snapshot(
    canonical: &str,
    response: SnapshotResponse,
) -> Result<Quote, MarketDataError> {
    let snapshot = response.ticker.ok_or_else(|| MarketDataError::NoData {
        provider: PROVIDER_ID.to_string(),
    })?;

    let price = if snapshot.day.c > 0.0 {
        snapshot.day.c
    } else {
        snapshot.last_trade.as_ref().map(|t| t.p).unwrap_or(0.0)
    };
    if price <= 0.0 {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let timestamp = if snapshot.updated > 0 {
        Utc.timestamp_nanos(snapshot.updated)
    } else {
        Utc::now()
    };

    Ok(Quote {
        symbol: canonical.to_string(),
        price: to_decimal(price),
        change: to_decimal(snapshot.todays_change),
        change_percent: to_decimal(snapshot.todays_change_perc),
        high: to_decimal(snapshot.day.h),
        low: to_decimal(snapshot.day.l),
        open: to_decimal(snapshot.day.o),
        previous_close: to_decimal(snapshot.prev_day.c),
        volume: to_decimal(snapshot.day.v),
        timestamp,
        source: SOURCE.to_string(),
    })
}

fn candles_from_aggregates(response: AggregatesResponse) -> Result<Vec<Candle>, MarketDataError> {
    if response.results.is_empty() {
        return Err(MarketDataError::NoData {
            provider: PROVIDER_ID.to_string(),
        });
    }

    let mut candles: Vec<Candle> = response
        .results
        .into_iter()
        .filter_map(|bar| {
            let time = match Utc.timestamp_millis_opt(bar.t).single() {
                Some(ts) => ts,
                None => {
                    warn!("Invalid aggregate timestamp: {}", bar.t);
                    return None;
                }
            };
            Some(Candle {
                time,
                open: to_decimal(bar.o),
                high: to_decimal(bar.h),
                low: to_decimal(bar.l),
                close: to_decimal(bar.c),
                volume: to_decimal(bar.v),
            })
        })
        .collect();

    candles.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(candles)
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            asset_classes: &[AssetClass::Equity],
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
        let api_key = self.api_key()?;
        let ticker = Self::ticker(&instrument)?;

        debug!("Fetching snapshot for {} from Polygon", ticker);

        let endpoint = format!(
            "/v2/snapshot/locale/us/markets/stocks/tickers/{}",
            urlencoding::encode(ticker)
        );
        let response: SnapshotResponse = self
            .http
            .get_json(&endpoint, &[("apiKey", api_key.to_string())], &[], "snapshot")
            .await?;

        quote_from_snapshot(&context.symbol, response)
    }

    async fn get_candles(
        &self,
        _context: &QuoteContext,
        instrument: ProviderInstrument,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let api_key = self.api_key()?;
        let ticker = Self::ticker(&instrument)?;
        let (multiplier, timespan) = resolution.aggregate_span();

        debug!(
            "Fetching {}x{} aggregates for {} from {} to {} from Polygon",
            multiplier,
            timespan,
            ticker,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        // Millisecond bounds keep intraday ranges exact; Polygon also accepts dates here
        let endpoint = format!(
            "/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            urlencoding::encode(ticker),
            multiplier,
            timespan,
            start.timestamp_millis(),
            end.timestamp_millis()
        );
        let params = [
            ("adjusted", "true".to_string()),
            ("sort", "asc".to_string()),
            ("limit", "50000".to_string()),
            ("apiKey", api_key.to_string()),
        ];
        let response: AggregatesResponse = self
            .http
            .get_json(&endpoint, &params, &[], "aggregates")
            .await?;

        candles_from_aggregates(response)
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
    fn test_disabled_without_key() {
        assert!(!PolygonProvider::new(None).is_enabled());
        assert!(!PolygonProvider::new(Some(String::new())).is_enabled());
        assert!(PolygonProvider::new(Some("pk".to_string())).is_enabled());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let provider = PolygonProvider::new(None);
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
    fn test_snapshot_mapping() {
        let json = r#"{
            "status": "OK",
            "ticker": {
                "ticker": "AAPL",
                "todaysChange": 1.25,
                "todaysChangePerc": 0.85,
                "day": {"o": 148.0, "h": 150.5, "l": 147.5, "c": 149.75, "v": 51234567, "vw": 149.1},
                "prevDay": {"o": 147.0, "h": 149.0, "l": 146.0, "c": 148.5, "v": 40000000, "vw": 148.0},
                "lastTrade": {"p": 149.8, "s": 100, "t": 1704067200000000000},
                "updated": 1704067200000000000
            }
        }"#;

        let response: SnapshotResponse = serde_json::from_str(json).unwrap();
        let quote = quote_from_snapshot("AAPL", response).unwrap();

        assert_eq!(quote.price, dec!(149.75));
        assert_eq!(quote.change, dec!(1.25));
        assert_eq!(quote.previous_close, dec!(148.5));
        assert_eq!(quote.volume, dec!(51234567));
        assert_eq!(quote.timestamp.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(quote.source, "polygon");
    }

    #[test]
    fn test_snapshot_falls_back_to_last_trade() {
        let json = r#"{
            "ticker": {
                "day": {"o": 0, "h": 0, "l": 0, "c": 0, "v": 0},
                "prevDay": {"c": 148.5},
                "lastTrade": {"p": 149.5}
            }
        }"#;

        let response: SnapshotResponse = serde_json::from_str(json).unwrap();
        let quote = quote_from_snapshot("AAPL", response).unwrap();
        assert_eq!(quote.price, dec!(149.5));
    }

    #[test]
    fn test_empty_snapshot_is_no_data() {
        let response: SnapshotResponse = serde_json::from_str(r#"{"status": "NOT_FOUND"}"#).unwrap();
        assert!(matches!(
            quote_from_snapshot("NOPE", response),
            Err(MarketDataError::NoData { .. })
        ));
    }

    #[test]
    fn test_aggregates_mapping() {
        let json = r#"{
            "ticker": "AAPL",
            "resultsCount": 2,
            "status": "OK",
            "results": [
                {"v": 1000, "vw": 10.1, "o": 10.0, "c": 10.5, "h": 11.0, "l": 9.5, "t": 1704153600000, "n": 12},
                {"v": 2000, "vw": 10.0, "o": 9.8, "c": 10.0, "h": 10.2, "l": 9.7, "t": 1704067200000, "n": 9}
            ]
        }"#;

        let response: AggregatesResponse = serde_json::from_str(json).unwrap();
        let candles = candles_from_aggregates(response).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time.timestamp(), 1_704_067_200);
        assert_eq!(candles[0].open, dec!(9.8));
        assert_eq!(candles[1].volume, dec!(1000));
    }

    #[test]
    fn test_aggregates_without_results_is_no_data() {
        let response: AggregatesResponse =
            serde_json::from_str(r#"{"status": "OK", "resultsCount": 0}"#).unwrap();
        assert!(matches!(
            candles_from_aggregates(response),
            Err(MarketDataError::NoData { .. })
        ));
    }
}
