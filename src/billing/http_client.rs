//! Rate-Limited HTTP Client for the payment provider API
//!
//! Wraps reqwest with a shared governor limiter so metering bursts after a
//! large flush stay under the provider's request quota.

use governor::{Quota, RateLimiter, state::{InMemoryState, NotKeyed}, clock::DefaultClock, middleware::NoOpMiddleware};
use nonzero_ext::nonzero;
use reqwest::{Client, RequestBuilder, Response};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::ProviderError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Rate-limited HTTP client. Clones share one limiter.
#[derive(Clone)]
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<DirectLimiter>,
    rate_limit_per_minute: u32,
}

impl RateLimitedClient {
    /// Create a new rate-limited client
    ///
    /// # Arguments
    /// * `rate_limit_per_minute` - Maximum requests allowed per minute
    /// * `timeout` - Upper bound for a whole request
    pub fn new(rate_limit_per_minute: u32, timeout: Duration) -> Result<Self, ProviderError> {
        let rate = NonZeroU32::new(rate_limit_per_minute).unwrap_or(nonzero!(1u32));
        let limiter = RateLimiter::direct(Quota::per_minute(rate));

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("keymeter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(RateLimitedClient {
            client,
            limiter: Arc::new(limiter),
            rate_limit_per_minute: rate.get(),
        })
    }

    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    /// Build a POST request
    pub fn post(&self, url: &str) -> RateLimitedRequestBuilder<'_> {
        RateLimitedRequestBuilder {
            client: self,
            builder: self.client.post(url),
        }
    }

    /// Wait for rate limit and execute request
    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        self.limiter.until_ready().await;

        debug!("Executing rate-limited request");

        let response = builder.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);

            warn!(retry_after_secs = retry_after, "Rate limited by payment provider");

            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        Ok(response)
    }
}

/// Request builder wrapper that enforces rate limiting
pub struct RateLimitedRequestBuilder<'a> {
    client: &'a RateLimitedClient,
    builder: RequestBuilder,
}

impl<'a> RateLimitedRequestBuilder<'a> {
    /// Add a form-encoded body
    pub fn form<T: serde::Serialize + ?Sized>(mut self, form: &T) -> Self {
        self.builder = self.builder.form(form);
        self
    }

    /// Add a bearer token header
    pub fn bearer_auth(mut self, token: &str) -> Self {
        self.builder = self.builder.bearer_auth(token);
        self
    }

    /// Send the request (waits for rate limit)
    pub async fn send(self) -> Result<Response, ProviderError> {
        self.client.execute(self.builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_client_creation() {
        let client = RateLimitedClient::new(120, Duration::from_secs(5)).unwrap();
        assert_eq!(client.rate_limit_per_minute(), 120);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let client = RateLimitedClient::new(0, Duration::from_secs(5)).unwrap();
        assert_eq!(client.rate_limit_per_minute(), 1);
    }
}
