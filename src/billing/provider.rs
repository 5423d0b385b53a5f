//! External payment provider reporting
//!
//! Usage is forwarded as meter events, one per (account, flush cycle).
//! Delivery is best effort: the caller logs failures and moves on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::http_client::RateLimitedClient;
use crate::config::BillingSettings;

/// Provider error types
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Outbound sink for aggregated usage
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Report `units` billable requests for `account_id`
    async fn report_usage(&self, account_id: &str, units: i64) -> Result<(), ProviderError>;
}

/// Stripe-compatible meter events client
pub struct MeterEventsClient {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
    event_name: String,
}

impl MeterEventsClient {
    pub fn new(
        client: RateLimitedClient,
        base_url: &str,
        api_key: &str,
        event_name: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            event_name: event_name.to_string(),
        }
    }

    /// Build the provider from billing settings; `None` when reporting is disabled
    pub fn from_settings(settings: &BillingSettings) -> Result<Option<Self>, ProviderError> {
        let Some(api_key) = settings.provider_key() else {
            return Ok(None);
        };
        let client = RateLimitedClient::new(
            settings.provider_rate_limit_per_minute,
            settings.provider_timeout(),
        )?;
        Ok(Some(Self::new(
            client,
            &settings.provider_base_url,
            api_key,
            &settings.provider_event_name,
        )))
    }
}

#[async_trait]
impl PaymentProvider for MeterEventsClient {
    async fn report_usage(&self, account_id: &str, units: i64) -> Result<(), ProviderError> {
        let url = format!("{}/v1/billing/meter_events", self.base_url);
        let identifier = Uuid::new_v4().to_string();
        let value = units.to_string();
        let form = [
            ("event_name", self.event_name.as_str()),
            ("payload[stripe_customer_id]", account_id),
            ("payload[value]", value.as_str()),
            ("identifier", identifier.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(account_id, units, "Meter event accepted");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthFailed(message));
        }
        Err(ProviderError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

/// Used when no provider key is configured: reporting is only logged
pub struct LogOnlyProvider;

#[async_trait]
impl PaymentProvider for LogOnlyProvider {
    async fn report_usage(&self, account_id: &str, units: i64) -> Result<(), ProviderError> {
        info!(account_id, units, "Payment provider disabled, usage not forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MeterEventsClient {
        let http = RateLimitedClient::new(600, Duration::from_secs(2)).unwrap();
        MeterEventsClient::new(http, &server.uri(), "sk_test_key", "api_requests")
    }

    #[tokio::test]
    async fn test_reports_meter_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/billing/meter_events"))
            .and(header("authorization", "Bearer sk_test_key"))
            .and(body_string_contains("event_name=api_requests"))
            .and(body_string_contains("payload%5Bstripe_customer_id%5D=acct-1"))
            .and(body_string_contains("payload%5Bvalue%5D=4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        tokio_test::assert_ok!(client_for(&server).report_usage("acct-1", 4).await);
    }

    #[tokio::test]
    async fn test_maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("acct-unauthorized"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("acct-throttled"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("acct-broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.report_usage("acct-unauthorized", 1).await,
            Err(ProviderError::AuthFailed(msg)) if msg == "bad key"
        ));
        assert!(matches!(
            client.report_usage("acct-throttled", 1).await,
            Err(ProviderError::RateLimited { retry_after_secs: 7 })
        ));
        assert!(matches!(
            client.report_usage("acct-broken", 1).await,
            Err(ProviderError::ApiError { status: 500, .. })
        ));
    }

    #[test]
    fn test_disabled_without_api_key() {
        let settings = BillingSettings::default();
        assert!(MeterEventsClient::from_settings(&settings).unwrap().is_none());
    }
}
