use crate::protocol::finnhub;
use crate::reconnect::ReconnectConfig;
use crate::state::Channel;

/// Default exchange ticker endpoint.
pub const DEFAULT_CRYPTO_URL: &str = "wss://stream.binance.com:9443/ws";

/// Default trade stream endpoint; the token is appended as a query parameter.
pub const DEFAULT_EQUITY_URL: &str = "wss://ws.finnhub.io";

/// Stream manager configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub crypto_url: String,
    pub equity_url: String,
    /// Token for the equity channel. Without one the channel is never opened.
    pub finnhub_token: Option<String>,
    pub reconnect: ReconnectConfig,
    /// Connect on the first `subscribe` while disconnected.
    pub auto_connect: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            crypto_url: DEFAULT_CRYPTO_URL.to_string(),
            equity_url: DEFAULT_EQUITY_URL.to_string(),
            finnhub_token: None,
            reconnect: ReconnectConfig::default(),
            auto_connect: true,
        }
    }
}

impl StreamConfig {
    pub fn with_finnhub_token(mut self, token: Option<String>) -> Self {
        self.finnhub_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Upstream URL for `channel`, `None` when the channel cannot be opened.
    pub fn url_for(&self, channel: Channel) -> Option<String> {
        match channel {
            Channel::Crypto => Some(self.crypto_url.clone()),
            Channel::Equity => self
                .finnhub_token
                .as_deref()
                .map(|token| finnhub::authenticated_url(&self.equity_url, token)),
        }
    }
}
