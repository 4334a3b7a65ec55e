//! Provider health and payload checks.
//!
//! This module provides the guards the aggregator puts around every provider:
//! - Rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Quote and candle validation

mod circuit_breaker;
mod rate_limiter;
mod validator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use validator::{QuoteValidator, ValidationSeverity};
