//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for provider symbols (ProviderSymbol)
//! - `instrument` - Asset classification (AssetClass)
//! - `provider_params` - Provider-specific instrument parameters (ProviderInstrument)
//! - `quote` - Quote data structures (Quote, QuoteContext)
//! - `candle` - OHLCV bars and bucket widths (Candle, Resolution)

mod candle;
mod instrument;
mod provider_params;
mod quote;
mod types;

pub use candle::{Candle, Resolution};
pub use instrument::AssetClass;
pub use provider_params::ProviderInstrument;
pub use quote::{Quote, QuoteContext};
pub use types::ProviderSymbol;
