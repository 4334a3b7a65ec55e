//! Adapters against a local HTTP stub.

use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use rust_decimal_macros::dec;

use marketpulse_market_data::provider::UpstreamClient;
use marketpulse_market_data::{
    AggregatorConfig, AggregatorProviders, AssetClass, CircuitState, CoinGeckoProvider,
    DataAggregator, FinnhubProvider, MarketDataError, MarketDataProvider, PolygonProvider,
    ProviderInstrument, QuoteContext, RateLimit, Resolution, RetryPolicy,
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        call_timeout: Some(Duration::from_secs(5)),
    }
}

/// Match on the path prefix, leaving the query to `match_query`.
fn path(prefix: &str) -> Matcher {
    Matcher::Regex(format!("^{}", prefix))
}

#[tokio::test]
async fn test_eth_quote_end_to_end_through_coingecko() {
    let mut server = mockito::Server::new_async().await;
    let simple_price = server
        .mock("GET", path("/simple/price"))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("ids".into(), "ethereum".into()),
            Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ethereum":{"usd":3000,"usd_24h_change":2.5,"usd_24h_vol":1000,"last_updated_at":1704067200}}"#)
        .create_async()
        .await;
    let bridge = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let providers = AggregatorProviders {
        equity_primary: Arc::new(
            FinnhubProvider::new(Some("fh".to_string()))
                .with_retry_policy(fast_retry())
                .with_base_url(server.url()),
        ),
        equity_secondary: Arc::new(PolygonProvider::new(None)),
        crypto_data: Arc::new(
            CoinGeckoProvider::new(None)
                .with_retry_policy(fast_retry())
                .with_base_url(server.url()),
        ),
    };
    let aggregator = DataAggregator::new(providers, AggregatorConfig::default());

    let quote = aggregator.get_quote("ETH-USD").await.unwrap().unwrap();

    assert_eq!(quote.price, dec!(3000));
    assert_eq!(quote.change_percent, dec!(2.5));
    assert_eq!(quote.change, dec!(75));
    assert_eq!(quote.source, "coingecko");
    simple_price.assert_async().await;
    bridge.assert_async().await;
}

#[tokio::test]
async fn test_finnhub_sends_token_header() {
    let mut server = mockito::Server::new_async().await;
    let quote = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::UrlEncoded("symbol".into(), "AAPL".into()))
        .match_header("x-finnhub-token", "secret")
        .with_status(200)
        .with_body(r#"{"c":189.5,"d":1.2,"dp":0.64,"h":190.1,"l":187.9,"o":188.2,"pc":188.3,"t":1704067200}"#)
        .create_async()
        .await;

    let provider = FinnhubProvider::new(Some("secret".to_string())).with_base_url(server.url());
    let context = QuoteContext::new("AAPL", AssetClass::Equity);
    let result = provider
        .get_latest_quote(
            &context,
            ProviderInstrument::EquitySymbol {
                symbol: Arc::from("AAPL"),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.price, dec!(189.5));
    assert_eq!(result.source, "finnhub");
    quote.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried_then_surface() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(3)
        .create_async()
        .await;

    let provider = FinnhubProvider::new(Some("k".to_string()))
        .with_retry_policy(fast_retry())
        .with_base_url(server.url());
    let context = QuoteContext::new("AAPL", AssetClass::Equity);
    let err = provider
        .get_latest_quote(
            &context,
            ProviderInstrument::EquitySymbol {
                symbol: Arc::from("AAPL"),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MarketDataError::UpstreamError {
            status_code: 503,
            retryable: true,
            ..
        }
    ));
    failing.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let forbidden = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::Any)
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let provider = FinnhubProvider::new(Some("k".to_string()))
        .with_retry_policy(fast_retry())
        .with_base_url(server.url());
    let context = QuoteContext::new("AAPL", AssetClass::Equity);
    let err = provider
        .get_latest_quote(
            &context,
            ProviderInstrument::EquitySymbol {
                symbol: Arc::from("AAPL"),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MarketDataError::UpstreamError {
            status_code: 403,
            retryable: false,
            ..
        }
    ));
    forbidden.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_opens_circuit_and_cascade_moves_on() {
    let mut server = mockito::Server::new_async().await;
    let limited = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::Any)
        .with_status(429)
        .expect(1)
        .create_async()
        .await;
    let snapshot = server
        .mock("GET", path("/v2/snapshot/locale/us/markets/stocks/tickers/AAPL"))
        .match_query(Matcher::UrlEncoded("apiKey".into(), "pk".into()))
        .with_status(200)
        .with_body(r#"{"status":"OK","ticker":{"todaysChange":1.0,"todaysChangePerc":0.5,"day":{"o":188,"h":190,"l":187,"c":189,"v":1000},"prevDay":{"c":188},"updated":1704067200000000000}}"#)
        .create_async()
        .await;

    let providers = AggregatorProviders {
        equity_primary: Arc::new(
            FinnhubProvider::new(Some("fh".to_string()))
                .with_retry_policy(fast_retry())
                .with_base_url(server.url()),
        ),
        equity_secondary: Arc::new(
            PolygonProvider::new(Some("pk".to_string()))
                .with_retry_policy(fast_retry())
                .with_base_url(server.url()),
        ),
        crypto_data: Arc::new(CoinGeckoProvider::new(None).with_base_url(server.url())),
    };
    let aggregator = DataAggregator::new(providers, AggregatorConfig::default());

    let quote = aggregator.get_quote("AAPL").await.unwrap().unwrap();

    assert_eq!(quote.source, "polygon");
    assert_eq!(quote.price, dec!(189));
    assert_eq!(aggregator.circuit_breaker().state("FINNHUB"), CircuitState::Open);
    limited.assert_async().await;
    snapshot.assert_async().await;
}

#[tokio::test]
async fn test_non_conforming_payload_is_validation_error() {
    let mut server = mockito::Server::new_async().await;
    let _ohlc = server
        .mock("GET", path("/coins/bitcoin/ohlc"))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"error":"coin not found"}"#)
        .create_async()
        .await;

    let provider = CoinGeckoProvider::new(None)
        .with_retry_policy(fast_retry())
        .with_base_url(server.url());
    let context = QuoteContext::new("BTC-USD", AssetClass::Crypto);
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(30);

    let err = provider
        .get_candles(
            &context,
            ProviderInstrument::CoinId {
                id: Arc::from("bitcoin"),
            },
            Resolution::Daily,
            start,
            end,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MarketDataError::ValidationError { .. }));
}

#[tokio::test]
async fn test_rate_limit_wait_is_not_charged_to_call_deadline() {
    let mut server = mockito::Server::new_async().await;
    let quote = server
        .mock("GET", path("/quote"))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"c":1.0}"#)
        .expect(2)
        .create_async()
        .await;

    // one token per second, so the second call waits about a second for its token
    let limits = RateLimit {
        requests_per_minute: 60,
        max_concurrency: 1,
        min_delay: Duration::ZERO,
    };
    let client = UpstreamClient::new("LIMITED", server.url(), &limits).with_retry_policy(RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(1),
        call_timeout: Some(Duration::from_millis(500)),
    });

    let first: serde_json::Value = client.get_json("/quote", &[], &[], "quote").await.unwrap();
    let started = std::time::Instant::now();
    let second: Result<serde_json::Value, _> = client.get_json("/quote", &[], &[], "quote").await;

    assert_eq!(first["c"], 1.0);
    assert!(second.is_ok(), "second call failed: {:?}", second);
    assert!(started.elapsed() >= Duration::from_millis(500));
    quote.assert_async().await;
}
