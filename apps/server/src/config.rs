use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use marketpulse_market_data::ProviderKeys;
use marketpulse_realtime::config::{DEFAULT_CRYPTO_URL, DEFAULT_EQUITY_URL};

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    /// Deadline for every upstream provider call.
    pub upstream_timeout: Duration,
    /// `text` or `json`
    pub log_format: String,
    pub provider_keys: ProviderKeys,
    pub crypto_stream_url: String,
    pub equity_stream_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_allow: vec!["*".to_string()],
            request_timeout: Duration::from_millis(30_000),
            upstream_timeout: Duration::from_millis(10_000),
            log_format: "text".to_string(),
            provider_keys: ProviderKeys::default(),
            crypto_stream_url: DEFAULT_CRYPTO_URL.to_string(),
            equity_stream_url: DEFAULT_EQUITY_URL.to_string(),
        }
    }
}

impl Config {
    /// Read `MP_*` settings and provider keys, loading `.env` first when present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("MP_LISTEN_ADDR") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid MP_LISTEN_ADDR '{}'", raw))?,
            Err(_) => defaults.listen_addr,
        };
        let cors_allow = std::env::var("MP_CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            listen_addr,
            cors_allow,
            request_timeout: env_millis("MP_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            upstream_timeout: env_millis("MP_UPSTREAM_TIMEOUT_MS", defaults.upstream_timeout),
            log_format: std::env::var("MP_LOG_FORMAT").unwrap_or(defaults.log_format),
            provider_keys: ProviderKeys {
                finnhub: env_key("FINNHUB_API_KEY"),
                polygon: env_key("POLYGON_API_KEY"),
                coingecko: env_key("COINGECKO_API_KEY"),
            },
            crypto_stream_url: std::env::var("MP_CRYPTO_STREAM_URL")
                .unwrap_or(defaults.crypto_stream_url),
            equity_stream_url: std::env::var("MP_EQUITY_STREAM_URL")
                .unwrap_or(defaults.equity_stream_url),
        })
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
