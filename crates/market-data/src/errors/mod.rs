//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior
//! - [`RetryPolicy`]: Bounded exponential backoff around a single upstream call

mod retry;

pub use retry::{with_retry, RetryClass, RetryPolicy};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// How long a provider is assumed to stay rate limited when it does not say.
const DEFAULT_RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines whether the same provider is retried, the cascade moves on to
/// the next provider, or the request is rejected outright.
///
/// The enum is `Clone` so a single deduplicated outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// General HTTP or provider failure.
    ///
    /// `status_code` is `0` when the request never produced a response
    /// (connection refused, DNS failure, reset).
    #[error("Upstream error from {provider} (HTTP {status_code}): {message}")]
    UpstreamError {
        status_code: u16,
        provider: String,
        message: String,
        retryable: bool,
    },

    /// The provider rate limited the request (HTTP 429).
    /// Never retried in place: the caller has to wait until `reset_at`.
    #[error("Rate limited: {provider} until {reset_at}")]
    RateLimited {
        provider: String,
        reset_at: DateTime<Utc>,
    },

    /// The provider answered with a payload that does not match its schema.
    #[error("Validation failed for {field}: {received}")]
    ValidationError { field: String, received: String },

    /// The per-call deadline elapsed before the provider answered.
    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    /// The provider needs an API key that was not supplied.
    #[error("Provider not configured: {provider}")]
    NotConfigured { provider: String },

    /// The provider answered but had nothing for this symbol or range.
    #[error("No data from {provider}")]
    NoData { provider: String },

    /// The operation is not implemented by this provider.
    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported { operation: String, provider: String },

    /// The circuit breaker is open for this provider.
    #[error("Circuit open: {provider}")]
    CircuitOpen { provider: String },

    /// The caller passed an argument that can never succeed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MarketDataError {
    /// Build an [`UpstreamError`](Self::UpstreamError) whose retryability follows the
    /// HTTP status: transport failures (`0`), request timeouts (408) and 5xx are
    /// transient, every other status is not.
    pub fn upstream(provider: &str, status_code: u16, message: impl Into<String>) -> Self {
        let retryable = status_code == 0 || status_code == 408 || status_code >= 500;
        Self::UpstreamError {
            status_code,
            provider: provider.to_string(),
            message: message.into(),
            retryable,
        }
    }

    /// Build a [`RateLimited`](Self::RateLimited) error with the default one minute window.
    pub fn rate_limited(provider: &str) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            reset_at: Utc::now() + Duration::seconds(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }

    /// Build a [`ValidationError`](Self::ValidationError).
    pub fn validation(field: impl Into<String>, received: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            received: received.into(),
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::WithBackoff`]: retry the same provider after a delay
    /// - [`RetryClass::NextProvider`]: give up on this provider, let the cascade move on
    /// - [`RetryClass::CircuitOpen`]: provider is cooling down, skip it
    /// - [`RetryClass::Never`]: the request itself is invalid
    ///
    /// # Examples
    ///
    /// ```
    /// use marketpulse_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::upstream("FINNHUB", 503, "Service Unavailable");
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = MarketDataError::rate_limited("FINNHUB");
    /// assert_eq!(error.retry_class(), RetryClass::NextProvider);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::UpstreamError {
                retryable: true, ..
            }
            | Self::Timeout { .. } => RetryClass::WithBackoff,

            Self::UpstreamError {
                retryable: false, ..
            }
            | Self::RateLimited { .. }
            | Self::ValidationError { .. }
            | Self::NotConfigured { .. }
            | Self::NoData { .. }
            | Self::NotSupported { .. } => RetryClass::NextProvider,

            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,

            Self::InvalidArgument(_) => RetryClass::Never,
        }
    }

    /// Whether this error counts against the provider's health.
    ///
    /// Only transient failures (the ones that are retried with backoff) feed the circuit
    /// breaker; a provider that simply has no data for a symbol is healthy.
    pub fn penalizes_provider(&self) -> bool {
        self.retry_class() == RetryClass::WithBackoff
    }

    /// The provider this error originated from, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::UpstreamError { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Timeout { provider }
            | Self::NotConfigured { provider }
            | Self::NoData { provider }
            | Self::NotSupported { provider, .. }
            | Self::CircuitOpen { provider } => Some(provider),
            Self::ValidationError { .. } | Self::InvalidArgument(_) => None,
        }
    }
}
