//! Connection lifecycle and channel identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use marketpulse_market_data::{symbols, AssetClass};

/// Connection lifecycle reported to state listeners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream channel a symbol streams from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Exchange 24h ticker stream, crypto pairs only.
    Crypto,
    /// Trade stream for equities, commodities and metals.
    Equity,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Crypto, Channel::Equity];

    /// Route a canonical symbol to its channel.
    pub fn for_symbol(symbol: &str) -> Self {
        match symbols::classify(symbol) {
            AssetClass::Crypto => Channel::Crypto,
            AssetClass::Equity | AssetClass::CommodityOrMetal => Channel::Equity,
        }
    }

    /// Upstream topic for a canonical symbol on this channel.
    pub fn topic_for(&self, symbol: &str) -> String {
        match self {
            Channel::Crypto => symbols::crypto_stream_topic(symbol),
            Channel::Equity => symbol.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Equity => "equity",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }

    #[test]
    fn test_channel_routing() {
        assert_eq!(Channel::for_symbol("BTC-USD"), Channel::Crypto);
        assert_eq!(Channel::for_symbol("AAPL"), Channel::Equity);
        assert_eq!(Channel::for_symbol("GC=F"), Channel::Equity);
    }

    #[test]
    fn test_topics() {
        assert_eq!(Channel::Crypto.topic_for("BTC-USD"), "btcusdt");
        assert_eq!(Channel::Crypto.topic_for("PEPE-USD"), "pepeusdt");
        assert_eq!(Channel::Equity.topic_for("AAPL"), "AAPL");
    }
}
