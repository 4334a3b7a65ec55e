use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    http::HeaderValue,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use marketpulse_market_data::{Candle, Quote, Resolution};
use marketpulse_realtime::{ConnectionState, StreamManager, TickListener, TickerData};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

const SECONDS_PER_DAY: i64 = 86_400;
const DEFAULT_LOOKBACK_DAYS: i64 = 60;
const TICKER_EVENT: &str = "ticker";

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    status: &'static str,
    stream: ConnectionState,
    in_flight: usize,
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        stream: state.stream.get_state(),
        in_flight: state.aggregator.in_flight(),
    })
}

// ============================================================================
// Quotes and candles
// ============================================================================

#[derive(Serialize)]
struct QuoteResponse {
    success: bool,
    data: Quote,
}

#[derive(Deserialize)]
struct QuoteQuery {
    symbol: Option<String>,
}

fn required_symbol(symbol: Option<String>) -> ApiResult<String> {
    symbol
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("symbol is required".to_string()))
}

async fn get_quote(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QuoteQuery>,
) -> ApiResult<Json<QuoteResponse>> {
    let symbol = required_symbol(q.symbol)?;
    let quote = state
        .aggregator
        .get_quote(&symbol)
        .await?
        .ok_or_else(|| ApiError::NotFound("Quote not found".to_string()))?;
    Ok(Json(QuoteResponse {
        success: true,
        data: quote,
    }))
}

#[derive(Deserialize)]
struct CandlesQuery {
    symbol: Option<String>,
    resolution: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
    range: Option<String>,
}

#[derive(Serialize)]
struct CandlesResponse {
    success: bool,
    symbol: String,
    resolution: Resolution,
    range: Option<String>,
    data: Vec<Candle>,
    count: usize,
}

/// Lookback in days and bucket width for a chart range preset.
fn range_preset(range: &str) -> (i64, Resolution) {
    match range {
        "1D" => (1, Resolution::FiveMinutes),
        "1W" => (7, Resolution::FifteenMinutes),
        "1M" => (30, Resolution::Daily),
        "3M" => (90, Resolution::Daily),
        "6M" => (180, Resolution::Daily),
        "1Y" => (365, Resolution::Weekly),
        "ALL" => (5 * 365, Resolution::Weekly),
        _ => (DEFAULT_LOOKBACK_DAYS, Resolution::Daily),
    }
}

async fn get_candles(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CandlesQuery>,
) -> ApiResult<Json<CandlesResponse>> {
    let symbol = required_symbol(q.symbol)?;
    let now = Utc::now().timestamp();
    let to = q.to.unwrap_or(now);

    let (from, resolution) = match q.range.as_deref() {
        Some(range) => {
            let (days, resolution) = range_preset(range);
            (now - days * SECONDS_PER_DAY, resolution)
        }
        None => {
            let resolution = match q.resolution.as_deref() {
                Some(raw) => raw.parse::<Resolution>()?,
                None => Resolution::Daily,
            };
            let from = q
                .from
                .unwrap_or(now - DEFAULT_LOOKBACK_DAYS * SECONDS_PER_DAY);
            (from, resolution)
        }
    };

    let candles = state
        .aggregator
        .get_candles(&symbol, resolution, from, to)
        .await?;
    Ok(Json(CandlesResponse {
        success: true,
        symbol,
        resolution,
        range: q.range,
        count: candles.len(),
        data: candles,
    }))
}

// ============================================================================
// Realtime stream
// ============================================================================

#[derive(Deserialize)]
struct StreamQuery {
    symbol: Option<String>,
}

/// Removes the client's tick listener when the SSE body is dropped.
struct TickerSubscription {
    stream: StreamManager,
    symbol: String,
    listener: TickListener,
}

impl Drop for TickerSubscription {
    fn drop(&mut self) {
        self.stream.unsubscribe(&self.symbol, &self.listener);
        tracing::debug!("SSE client for {} went away", self.symbol);
    }
}

async fn stream_ticker(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let symbol = required_symbol(q.symbol)?;
    let (sender, receiver) = mpsc::unbounded_channel::<TickerData>();
    let listener: TickListener = Arc::new(move |tick: &TickerData| {
        // Closed receivers are cleaned up by TickerSubscription
        let _ = sender.send(tick.clone());
    });
    state.stream.subscribe(&symbol, listener.clone());
    let subscription = TickerSubscription {
        stream: state.stream.clone(),
        symbol,
        listener,
    };

    let stream = tokio_stream::StreamExt::filter_map(
        UnboundedReceiverStream::new(receiver),
        move |tick| {
            let _subscription = &subscription;
            match SseEvent::default().event(TICKER_EVENT).json_data(&tick) {
                Ok(event) => Some(Ok(event)),
                Err(err) => {
                    tracing::error!("Failed to serialize ticker for {}: {}", tick.symbol, err);
                    None
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = if config.cors_allow.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors_allow
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                    None
                }
            })
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins)
    };

    let api = Router::new()
        .route("/quote", get(get_quote))
        .route("/candles", get(get_candles))
        .route("/stream", get(stream_ticker));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_presets() {
        assert_eq!(range_preset("1D"), (1, Resolution::FiveMinutes));
        assert_eq!(range_preset("1W"), (7, Resolution::FifteenMinutes));
        assert_eq!(range_preset("1Y"), (365, Resolution::Weekly));
        assert_eq!(range_preset("ALL"), (1825, Resolution::Weekly));
        assert_eq!(range_preset("bogus"), (60, Resolution::Daily));
    }

    #[test]
    fn test_required_symbol() {
        assert_eq!(required_symbol(Some(" aapl ".into())).unwrap(), "aapl");
        assert!(required_symbol(Some("  ".into())).is_err());
        assert!(required_symbol(None).is_err());
    }
}
