use std::sync::Arc;

/// Provider-specific symbol derived at runtime
pub type ProviderSymbol = Arc<str>;
