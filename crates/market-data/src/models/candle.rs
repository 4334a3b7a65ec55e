use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// One OHLCV bar.
///
/// A series is ordered by ascending `time`; each provider emits it that way.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, serialized as epoch seconds
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// A bar built from a single price sample (open = high = low = close).
    pub fn from_price(time: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
        }
    }
}

/// Candle bucket width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resolution {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    Daily,
    Weekly,
}

impl Resolution {
    /// Wire spelling shared by callers and the equity candle endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1",
            Self::FiveMinutes => "5",
            Self::FifteenMinutes => "15",
            Self::Daily => "D",
            Self::Weekly => "W",
        }
    }

    /// Aggregate bar size as `(multiplier, timespan)`.
    pub fn aggregate_span(&self) -> (u32, &'static str) {
        match self {
            Self::OneMinute => (1, "minute"),
            Self::FiveMinutes => (5, "minute"),
            Self::FifteenMinutes => (15, "minute"),
            Self::Daily => (1, "day"),
            Self::Weekly => (1, "week"),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::OneMinute),
            "5" => Ok(Self::FiveMinutes),
            "15" => Ok(Self::FifteenMinutes),
            "D" | "d" => Ok(Self::Daily),
            "W" | "w" => Ok(Self::Weekly),
            other => Err(MarketDataError::InvalidArgument(format!(
                "unsupported resolution '{}'",
                other
            ))),
        }
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
