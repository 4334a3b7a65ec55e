use std::fmt;

use serde::{Deserialize, Serialize};

/// Asset class derived from a symbol's spelling.
///
/// Decides which provider cascade serves a symbol and which realtime
/// channel carries its ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetClass {
    /// Stocks, ETFs, indices (`AAPL`, `SPY`)
    Equity,
    /// USD-quoted crypto (`BTC-USD`)
    Crypto,
    /// Futures-style commodity and metal symbols (`GC=F`, `CL=F`)
    CommodityOrMetal,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Crypto => "crypto",
            Self::CommodityOrMetal => "commodityOrMetal",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
