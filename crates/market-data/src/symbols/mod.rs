//! Symbol classification and provider symbol mapping.
//!
//! Everything here is pure. A symbol's asset class is decided from its spelling alone:
//!
//! | Spelling | Class |
//! |----------|-------|
//! | ends with `-USD`, no `=` | [`AssetClass::Crypto`] |
//! | contains `=F` | [`AssetClass::CommodityOrMetal`] |
//! | anything else | [`AssetClass::Equity`] |
//!
//! Table lookups that miss return the input symbol unchanged; a missing entry means
//! "the provider spells it the same way".

mod tables;

use std::sync::Arc;

use crate::models::{AssetClass, ProviderInstrument};

use tables::{COIN_IDS, OANDA_CODES, STREAM_CODES};

const CRYPTO_QUOTE_SUFFIX: &str = "-USD";
const FUTURES_MARKER: &str = "=F";

/// Normalize caller input to the canonical spelling used as cache and table keys.
pub fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Classify a canonical symbol.
pub fn classify(symbol: &str) -> AssetClass {
    if symbol.ends_with(CRYPTO_QUOTE_SUFFIX) && !symbol.contains('=') {
        AssetClass::Crypto
    } else if symbol.contains(FUTURES_MARKER) {
        AssetClass::CommodityOrMetal
    } else {
        AssetClass::Equity
    }
}

/// Coin id for the crypto market-data provider, only when the table knows the symbol.
pub fn mapped_coin_id(symbol: &str) -> Option<&'static str> {
    COIN_IDS.get(symbol).copied()
}

/// Coin id for the crypto market-data provider, falling back to the input.
pub fn coin_id(symbol: &str) -> String {
    mapped_coin_id(symbol)
        .map(str::to_string)
        .unwrap_or_else(|| symbol.to_string())
}

/// OANDA-style symbol for a commodity or metal, falling back to the input.
pub fn oanda_symbol(symbol: &str) -> String {
    match OANDA_CODES.get(symbol) {
        Some(code) => format!("OANDA:{}", code),
        None => symbol.to_string(),
    }
}

/// Realtime stream pair for a crypto symbol, falling back to the input.
pub fn stream_code(symbol: &str) -> String {
    STREAM_CODES
        .get(symbol)
        .map(|code| code.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// Realtime stream pair for a crypto symbol, deriving `<base>usdt` when unmapped.
pub fn crypto_stream_topic(symbol: &str) -> String {
    match STREAM_CODES.get(symbol) {
        Some(code) => code.to_string(),
        None => usdt_pair(symbol).to_lowercase(),
    }
}

/// Exchange-qualified pair used by the equity provider's crypto bridge ("BINANCE:BTCUSDT").
pub fn binance_pair(symbol: &str) -> String {
    format!("BINANCE:{}", usdt_pair(symbol))
}

fn usdt_pair(symbol: &str) -> String {
    symbol.replace(CRYPTO_QUOTE_SUFFIX, "USDT")
}

// ============================================================================
// Provider instruments
// ============================================================================

pub fn equity_instrument(symbol: &str) -> ProviderInstrument {
    ProviderInstrument::EquitySymbol {
        symbol: Arc::from(symbol),
    }
}

pub fn exchange_pair_instrument(symbol: &str) -> ProviderInstrument {
    ProviderInstrument::ExchangePair {
        symbol: Arc::from(binance_pair(symbol)),
    }
}

pub fn oanda_instrument(symbol: &str) -> ProviderInstrument {
    ProviderInstrument::OandaSymbol {
        symbol: Arc::from(oanda_symbol(symbol)),
    }
}

/// Coin id instrument, `None` when the symbol has no coin id mapping.
pub fn coin_instrument(symbol: &str) -> Option<ProviderInstrument> {
    mapped_coin_id(symbol).map(|id| ProviderInstrument::CoinId { id: Arc::from(id) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("BTC-USD"), AssetClass::Crypto);
        assert_eq!(classify("GC=F"), AssetClass::CommodityOrMetal);
        assert_eq!(classify("AAPL"), AssetClass::Equity);
    }

    #[test]
    fn test_classify_edge_cases() {
        // `=` disqualifies the crypto rule
        assert_eq!(classify("EUR-USD=X"), AssetClass::Equity);
        assert_eq!(classify("BRK-B"), AssetClass::Equity);
        assert_eq!(classify("CL=F"), AssetClass::CommodityOrMetal);
        assert_eq!(classify("PEPE-USD"), AssetClass::Crypto);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  btc-usd "), "BTC-USD");
        assert_eq!(normalize("gc=f"), "GC=F");
    }

    #[test]
    fn test_coin_id_lookup() {
        assert_eq!(coin_id("BTC-USD"), "bitcoin");
        assert_eq!(coin_id("AVAX-USD"), "avalanche-2");
        assert_eq!(mapped_coin_id("FOO-USD"), None);
        assert_eq!(coin_id("FOO-USD"), "FOO-USD");
    }

    #[test]
    fn test_oanda_symbol_lookup() {
        assert_eq!(oanda_symbol("GC=F"), "OANDA:XAU_USD");
        assert_eq!(oanda_symbol("BZ=F"), "OANDA:BCO_USD");
        assert_eq!(oanda_symbol("LE=F"), "LE=F");
    }

    #[test]
    fn test_stream_codes() {
        assert_eq!(stream_code("ETH-USD"), "ethusdt");
        assert_eq!(stream_code("PEPE-USD"), "PEPE-USD");
        assert_eq!(crypto_stream_topic("PEPE-USD"), "pepeusdt");
        assert_eq!(crypto_stream_topic("BTC-USD"), "btcusdt");
    }

    #[test]
    fn test_binance_pair() {
        assert_eq!(binance_pair("BTC-USD"), "BINANCE:BTCUSDT");
        assert_eq!(binance_pair("SOL-USD"), "BINANCE:SOLUSDT");
    }

    #[test]
    fn test_coin_instrument_requires_mapping() {
        assert!(coin_instrument("ETH-USD").is_some());
        assert!(coin_instrument("FOO-USD").is_none());
    }
}
