//! Upstream wire protocols.
//!
//! Each channel speaks its own JSON dialect. This module turns subscription changes
//! into control frames and inbound text frames into [`RawTick`]s keyed by the
//! upstream topic. Mapping a topic back to the subscribed symbol is the manager's job.

pub mod binance;
pub mod finnhub;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::StreamError;
use crate::state::Channel;

/// A tick as the upstream spelled it, before symbol resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTick {
    /// Upstream topic (`btcusdt`, `AAPL`)
    pub topic: String,
    pub price: Decimal,
    pub change: Decimal,
    pub change_percent: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Result of parsing one inbound text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Market data for one or more topics.
    Ticks(Vec<RawTick>),
    /// Acknowledgements, heartbeats and events nobody subscribes to.
    Ignored,
    /// The upstream rejected a request.
    Rejected(String),
}

/// Control frame subscribing `topic` on `channel`.
pub fn subscribe_frame(
    channel: Channel,
    topic: &str,
    request_id: u64,
) -> Result<String, StreamError> {
    match channel {
        Channel::Crypto => binance::subscribe_frame(topic, request_id),
        Channel::Equity => finnhub::subscribe_frame(topic),
    }
}

/// Control frame unsubscribing `topic` on `channel`.
pub fn unsubscribe_frame(
    channel: Channel,
    topic: &str,
    request_id: u64,
) -> Result<String, StreamError> {
    match channel {
        Channel::Crypto => binance::unsubscribe_frame(topic, request_id),
        Channel::Equity => finnhub::unsubscribe_frame(topic),
    }
}

/// Parse one inbound text frame from `channel`.
pub fn parse(channel: Channel, text: &str) -> Result<Inbound, StreamError> {
    match channel {
        Channel::Crypto => binance::parse(text),
        Channel::Equity => finnhub::parse(text),
    }
}

/// Whether an upstream topic belongs to a subscription's topic.
///
/// Exchange pairs come back upper-cased (`BTCUSDT`) while subscriptions use the
/// lower-case stream code, so the crypto channel compares case-insensitively.
pub fn topic_matches(channel: Channel, subscribed: &str, received: &str) -> bool {
    match channel {
        Channel::Crypto => subscribed.eq_ignore_ascii_case(received),
        Channel::Equity => subscribed == received,
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>, StreamError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StreamError::Parse(format!("timestamp out of range: {}", millis)))
}

fn decimal_from_str(field: &str, value: &str) -> Result<Decimal, StreamError> {
    value
        .parse::<Decimal>()
        .map_err(|e| StreamError::Parse(format!("{}: '{}' ({})", field, value, e)))
}

fn decimal_from_f64(field: &str, value: f64) -> Result<Decimal, StreamError> {
    Decimal::from_f64(value)
        .map(|d| d.normalize())
        .ok_or_else(|| StreamError::Parse(format!("{}: {} is not a finite number", field, value)))
}
