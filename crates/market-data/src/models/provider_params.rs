use serde::{Deserialize, Serialize};

use super::types::ProviderSymbol;

/// Provider-specific instrument parameters.
/// Produced by the symbol mapping tables, consumed by providers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderInstrument {
    /// Plain exchange ticker ("AAPL")
    EquitySymbol { symbol: ProviderSymbol },

    /// Exchange-qualified crypto pair ("BINANCE:BTCUSDT")
    ExchangePair { symbol: ProviderSymbol },

    /// OANDA-style commodity or metal code ("OANDA:XAU_USD")
    OandaSymbol { symbol: ProviderSymbol },

    /// Crypto market-data provider coin identifier ("bitcoin")
    CoinId { id: ProviderSymbol },
}

impl ProviderInstrument {
    /// The native symbol string to put on the wire.
    pub fn native_symbol(&self) -> &str {
        match self {
            Self::EquitySymbol { symbol }
            | Self::ExchangePair { symbol }
            | Self::OandaSymbol { symbol } => symbol,
            Self::CoinId { id } => id,
        }
    }
}
