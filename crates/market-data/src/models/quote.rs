use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::AssetClass;

/// Request context for quote and candle fetching
#[derive(Clone, Debug)]
pub struct QuoteContext {
    /// Canonical symbol as the caller spelled it ("BTC-USD", "AAPL", "GC=F")
    pub symbol: String,

    /// Asset class the symbol was classified as
    pub asset_class: AssetClass,
}

impl QuoteContext {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
        }
    }
}

/// Point-in-time price snapshot with day statistics.
///
/// Immutable once built: a fresher quote replaces a cached one, it is never patched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Canonical symbol
    pub symbol: String,

    /// Last traded / current price
    pub price: Decimal,

    /// Absolute change versus previous close
    pub change: Decimal,

    /// Percent change versus previous close
    pub change_percent: Decimal,

    pub high: Decimal,
    pub low: Decimal,
    pub open: Decimal,
    pub previous_close: Decimal,

    /// Day volume (zero when the provider does not report it)
    pub volume: Decimal,

    /// Time of the quote, serialized as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Provider that supplied the quote ("finnhub", "polygon", "coingecko", ...)
    pub source: String,
}

impl Quote {
    /// Create a quote where every day statistic equals the current price.
    ///
    /// Providers then overwrite whatever fields they actually report.
    pub fn flat(
        symbol: impl Into<String>,
        price: Decimal,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            high: price,
            low: price,
            open: price,
            previous_close: price,
            volume: Decimal::ZERO,
            timestamp,
            source: source.into(),
        }
    }
}
