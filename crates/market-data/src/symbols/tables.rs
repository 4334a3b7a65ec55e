//! Static symbol translation tables.

use std::collections::HashMap;

use lazy_static::lazy_static;

lazy_static! {
    /// Canonical crypto symbol -> crypto market-data provider coin id.
    pub(crate) static ref COIN_IDS: HashMap<&'static str, &'static str> = HashMap::from([
        ("BTC-USD", "bitcoin"),
        ("ETH-USD", "ethereum"),
        ("BNB-USD", "binancecoin"),
        ("SOL-USD", "solana"),
        ("XRP-USD", "ripple"),
        ("ADA-USD", "cardano"),
        ("DOGE-USD", "dogecoin"),
        ("DOT-USD", "polkadot"),
        ("AVAX-USD", "avalanche-2"),
        ("LINK-USD", "chainlink"),
        ("MATIC-USD", "matic-network"),
        ("LTC-USD", "litecoin"),
        ("UNI-USD", "uniswap"),
        ("XLM-USD", "stellar"),
        ("ATOM-USD", "cosmos"),
        ("NEAR-USD", "near"),
        ("APT-USD", "aptos"),
        ("ARB-USD", "arbitrum"),
        ("OP-USD", "optimism"),
        ("AAVE-USD", "aave"),
        ("GRT-USD", "the-graph"),
        ("FIL-USD", "filecoin"),
        ("RNDR-USD", "render-token"),
        ("INJ-USD", "injective-protocol"),
        ("SUI-USD", "sui"),
        ("TON-USD", "the-open-network"),
        ("SHIB-USD", "shiba-inu"),
        ("PEPE-USD", "pepe"),
        ("ICP-USD", "internet-computer"),
        ("TRX-USD", "tron"),
    ]);

    /// Futures-style commodity/metal symbol -> OANDA instrument code.
    pub(crate) static ref OANDA_CODES: HashMap<&'static str, &'static str> = HashMap::from([
        ("GC=F", "XAU_USD"),
        ("SI=F", "XAG_USD"),
        ("PL=F", "XPT_USD"),
        ("PA=F", "XPD_USD"),
        ("HG=F", "XCU_USD"),
        ("CL=F", "BCO_USD"),
        ("BZ=F", "BCO_USD"),
        ("NG=F", "NATGAS_USD"),
        ("ZC=F", "CORN_USD"),
        ("ZW=F", "WHEAT_USD"),
        ("ZS=F", "SOYBN_USD"),
        ("KC=F", "COFFEE_USD"),
        ("CT=F", "COTTON_USD"),
        ("SB=F", "SUGAR_USD"),
        ("CC=F", "COCOA_USD"),
    ]);

    /// Canonical crypto symbol -> realtime crypto stream pair.
    pub(crate) static ref STREAM_CODES: HashMap<&'static str, &'static str> = HashMap::from([
        ("BTC-USD", "btcusdt"),
        ("ETH-USD", "ethusdt"),
        ("SOL-USD", "solusdt"),
        ("DOGE-USD", "dogeusdt"),
        ("XRP-USD", "xrpusdt"),
        ("ADA-USD", "adausdt"),
        ("AVAX-USD", "avaxusdt"),
        ("DOT-USD", "dotusdt"),
        ("MATIC-USD", "maticusdt"),
        ("LINK-USD", "linkusdt"),
        ("BNB-USD", "bnbusdt"),
        ("LTC-USD", "ltcusdt"),
        ("UNI-USD", "uniusdt"),
        ("ATOM-USD", "atomusdt"),
        ("NEAR-USD", "nearusdt"),
    ]);
}
