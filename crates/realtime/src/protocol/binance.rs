//! Exchange ticker channel.
//!
//! Control frames carry a request id; inbound `24hrTicker` events carry every
//! number as a decimal string.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use super::{decimal_from_str, timestamp_from_millis, Inbound, RawTick};
use crate::error::StreamError;

const TICKER_EVENT: &str = "24hrTicker";
const TICKER_SUFFIX: &str = "@ticker";

// ============================================================================
// Wire Structures
// ============================================================================

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WsTicker {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "p")]
    price_change: String,
    #[serde(rename = "P")]
    price_change_percent: String,
    #[serde(rename = "q")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct WsError {
    code: Option<i64>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WsFrame {
    Ticker(WsTicker),
    Error { error: WsError },
    /// Request acknowledgements (`{"result":null,"id":1}`) and other events.
    Other(#[allow(dead_code)] IgnoredAny),
}

// ============================================================================
// Control frames
// ============================================================================

pub fn subscribe_frame(topic: &str, request_id: u64) -> Result<String, StreamError> {
    control_frame("SUBSCRIBE", topic, request_id)
}

pub fn unsubscribe_frame(topic: &str, request_id: u64) -> Result<String, StreamError> {
    control_frame("UNSUBSCRIBE", topic, request_id)
}

fn control_frame(
    method: &'static str,
    topic: &str,
    request_id: u64,
) -> Result<String, StreamError> {
    let msg = SubscribeMessage {
        method,
        params: vec![format!("{}{}", topic, TICKER_SUFFIX)],
        id: request_id,
    };
    Ok(serde_json::to_string(&msg)?)
}

// ============================================================================
// Inbound
// ============================================================================

pub fn parse(text: &str) -> Result<Inbound, StreamError> {
    match serde_json::from_str::<WsFrame>(text)? {
        WsFrame::Ticker(ticker) if ticker.event_type == TICKER_EVENT => {
            Ok(Inbound::Ticks(vec![tick_from_ticker(ticker)?]))
        }
        WsFrame::Ticker(_) | WsFrame::Other(_) => Ok(Inbound::Ignored),
        WsFrame::Error { error } => Ok(Inbound::Rejected(format!(
            "code {}: {}",
            error.code.unwrap_or_default(),
            error.msg.unwrap_or_default()
        ))),
    }
}

fn tick_from_ticker(ticker: WsTicker) -> Result<RawTick, StreamError> {
    Ok(RawTick {
        price: decimal_from_str("c", &ticker.last_price)?,
        change: decimal_from_str("p", &ticker.price_change)?,
        change_percent: decimal_from_str("P", &ticker.price_change_percent)?,
        volume: decimal_from_str("q", &ticker.quote_volume)?,
        timestamp: timestamp_from_millis(ticker.event_time)?,
        topic: ticker.symbol,
    })
}
