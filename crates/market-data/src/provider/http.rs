//! Shared HTTP plumbing for provider adapters.
//!
//! Every upstream request goes through [`UpstreamClient::get_json`], which:
//! 1. retries under the provider's [`RetryPolicy`]
//! 2. waits for a rate-limit token before each attempt; the wait is not charged to the
//!    per-call deadline, which only bounds the HTTP exchange
//! 3. maps HTTP failures onto the error taxonomy
//! 4. decodes the body into the provider's wire struct, rejecting non-conforming
//!    payloads as [`MarketDataError::ValidationError`]

use std::sync::Arc;
use std::time::Duration;

use num_traits::FromPrimitive;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{MarketDataError, RetryPolicy};
use crate::registry::{RateLimitConfig, RateLimiter};

use super::capabilities::RateLimit;

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

/// HTTP client bound to one provider.
pub struct UpstreamClient {
    client: Client,
    provider: &'static str,
    base_url: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    pub fn new(provider: &'static str, base_url: impl Into<String>, rate_limit: &RateLimit) -> Self {
        let limiter = Arc::new(RateLimiter::new());
        limiter.configure(provider, RateLimitConfig::from(rate_limit));

        Self {
            client: Self::build_client(RetryPolicy::default().call_timeout),
            provider,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
            limiter,
        }
    }

    fn build_client(call_timeout: Option<Duration>) -> Client {
        let mut builder = Client::builder();
        if let Some(timeout) = call_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().unwrap_or_else(|_| Client::new())
    }

    /// Replace the retry policy (and with it the per-call deadline).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = Self::build_client(retry.call_timeout);
        self.retry = retry;
        self
    }

    /// Point the client at a different host, e.g. a pro-tier endpoint or a local stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `endpoint` and decode the JSON body as `T`.
    ///
    /// `field` names the payload in validation errors.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
        field: &str,
    ) -> Result<T, MarketDataError> {
        let attempts = RetryPolicy {
            call_timeout: None,
            ..self.retry.clone()
        };
        let text = attempts
            .run(self.provider, move || async move {
                self.limiter.acquire(self.provider).await;
                self.retry
                    .within_deadline(self.provider, self.send_once(endpoint, query, headers))
                    .await
            })
            .await?;

        serde_json::from_str(&text).map_err(|e| MarketDataError::validation(field, e.to_string()))
    }

    async fn send_once(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} request: {}", self.provider, endpoint);

        let mut request = self.client.get(&url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::rate_limited(self.provider));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(MarketDataError::upstream(
                self.provider,
                status.as_u16(),
                format!("HTTP {} - {}", status, snippet),
            ));
        }

        response.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, error: reqwest::Error) -> MarketDataError {
        if error.is_timeout() {
            MarketDataError::Timeout {
                provider: self.provider.to_string(),
            }
        } else {
            MarketDataError::upstream(self.provider, 0, format!("Request failed: {}", error))
        }
    }
}

/// Convert a wire float into a decimal; non-finite values become zero and are then
/// rejected by validation.
pub(crate) fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}
