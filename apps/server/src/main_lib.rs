use std::sync::Arc;

use marketpulse_market_data::{AggregatorConfig, DataAggregator, RetryPolicy};
use marketpulse_realtime::{StreamConfig, StreamManager};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub struct AppState {
    pub aggregator: DataAggregator,
    pub stream: StreamManager,
}

pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let keys = &config.provider_keys;
    tracing::info!(
        "Providers: finnhub={} polygon={} coingecko_pro={}",
        keys.finnhub.is_some(),
        keys.polygon.is_some(),
        keys.coingecko.is_some()
    );

    let retry = RetryPolicy {
        call_timeout: Some(config.upstream_timeout),
        ..RetryPolicy::default()
    };
    let aggregator = DataAggregator::from_keys(keys, &retry, AggregatorConfig::default());

    // Channels open lazily on the first stream subscription
    let stream = StreamManager::new(
        StreamConfig {
            crypto_url: config.crypto_stream_url.clone(),
            equity_url: config.equity_stream_url.clone(),
            ..StreamConfig::default()
        }
        .with_finnhub_token(keys.finnhub.clone()),
    );
    stream.on_state_change(|state| tracing::info!("Realtime stream is {}", state));

    Ok(Arc::new(AppState { aggregator, stream }))
}
