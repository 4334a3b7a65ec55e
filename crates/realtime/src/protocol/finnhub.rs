//! Trade channel for equities, commodities and metals.
//!
//! Trades carry no day statistics, so ticks from this channel report a change of
//! zero.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::{decimal_from_f64, timestamp_from_millis, Inbound, RawTick};
use crate::error::StreamError;

// ============================================================================
// Wire Structures
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsFrame {
    Trade {
        #[serde(default)]
        data: Vec<WsTrade>,
    },
    Ping,
    Error {
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WsTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "v", default)]
    volume: f64,
    #[serde(rename = "t")]
    time: i64,
}

// ============================================================================
// Control frames
// ============================================================================

pub fn subscribe_frame(symbol: &str) -> Result<String, StreamError> {
    Ok(json!({ "type": "subscribe", "symbol": symbol }).to_string())
}

pub fn unsubscribe_frame(symbol: &str) -> Result<String, StreamError> {
    Ok(json!({ "type": "unsubscribe", "symbol": symbol }).to_string())
}

/// Channel URL with the API token attached.
pub fn authenticated_url(base_url: &str, token: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base_url, separator, token)
}

// ============================================================================
// Inbound
// ============================================================================

pub fn parse(text: &str) -> Result<Inbound, StreamError> {
    match serde_json::from_str::<WsFrame>(text)? {
        WsFrame::Trade { data } => {
            let ticks = data
                .into_iter()
                .map(tick_from_trade)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Inbound::Ticks(ticks))
        }
        WsFrame::Ping | WsFrame::Other => Ok(Inbound::Ignored),
        WsFrame::Error { msg } => Ok(Inbound::Rejected(msg)),
    }
}

fn tick_from_trade(trade: WsTrade) -> Result<RawTick, StreamError> {
    Ok(RawTick {
        price: decimal_from_f64("p", trade.price)?,
        change: Decimal::ZERO,
        change_percent: Decimal::ZERO,
        volume: decimal_from_f64("v", trade.volume)?,
        timestamp: timestamp_from_millis(trade.time)?,
        topic: trade.symbol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;

    #[test]
    fn test_control_frames() {
        let sub: Value = serde_json::from_str(&subscribe_frame("AAPL").unwrap()).unwrap();
        let unsub: Value = serde_json::from_str(&unsubscribe_frame("AAPL").unwrap()).unwrap();

        assert_eq!(sub, json!({"type": "subscribe", "symbol": "AAPL"}));
        assert_eq!(unsub, json!({"type": "unsubscribe", "symbol": "AAPL"}));
    }

    #[test]
    fn test_authenticated_url() {
        assert_eq!(
            authenticated_url("wss://ws.finnhub.io", "abc"),
            "wss://ws.finnhub.io?token=abc"
        );
        assert_eq!(
            authenticated_url("wss://host/ws?v=1", "abc"),
            "wss://host/ws?v=1&token=abc"
        );
    }

    #[test]
    fn test_parse_trades() {
        let text = r#"{"type":"trade","data":[{"s":"AAPL","p":189.5,"v":100,"t":1704067200000,"c":["1"]},{"s":"MSFT","p":375.25,"v":5,"t":1704067200500}]}"#;

        let Inbound::Ticks(ticks) = parse(text).unwrap() else {
            panic!("expected ticks");
        };

        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].topic, "AAPL");
        assert_eq!(ticks[0].price, dec!(189.5));
        assert_eq!(ticks[0].change, Decimal::ZERO);
        assert_eq!(ticks[0].change_percent, Decimal::ZERO);
        assert_eq!(ticks[0].volume, dec!(100));
        assert_eq!(ticks[1].timestamp.timestamp_millis(), 1_704_067_200_500);
    }

    #[test]
    fn test_ping_and_unknown_are_ignored() {
        assert_eq!(parse(r#"{"type":"ping"}"#).unwrap(), Inbound::Ignored);
        assert_eq!(parse(r#"{"type":"news","data":[]}"#).unwrap(), Inbound::Ignored);
    }

    #[test]
    fn test_error_is_rejected() {
        assert_eq!(
            parse(r#"{"type":"error","msg":"Invalid token"}"#).unwrap(),
            Inbound::Rejected("Invalid token".to_string())
        );
    }

    #[test]
    fn test_missing_price_is_parse_error() {
        let text = r#"{"type":"trade","data":[{"s":"AAPL","v":1,"t":1}]}"#;
        assert!(matches!(parse(text), Err(StreamError::Parse(_))));
    }
}
