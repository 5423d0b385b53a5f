//! Decision engine

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hashing::CredentialHasher;
use crate::db::{ActiveCredential, CredentialStore};
use crate::error::GateError;
use crate::quota::{QuotaWindow, WindowCounterStore};

/// Identity attached downstream on Allow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub api_key_id: Uuid,
}

/// Outcome of one authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Identity),
    Deny,
    RateLimited,
}

impl Decision {
    /// Value of the `x-ext-authz-check-result` header
    pub fn check_result(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allowed",
            Decision::Deny => "forbidden",
            Decision::RateLimited => "rate_limited",
        }
    }
}

/// Extract the token of an `Authorization: Bearer <token>` header value.
/// Anything else, including extra spaces, is rejected.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

pub struct AuthEngine {
    credentials: Arc<dyn CredentialStore>,
    counters: Arc<dyn WindowCounterStore>,
    hasher: CredentialHasher,
    key_prefix: String,
    store_timeout: Duration,
}

impl AuthEngine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        counters: Arc<dyn WindowCounterStore>,
        hasher: CredentialHasher,
        store_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            counters,
            hasher,
            key_prefix: String::new(),
            store_timeout,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Decide on the raw `Authorization` header value
    pub async fn decide(&self, authorization: Option<&str>) -> Decision {
        match self.authorize(authorization).await {
            Ok(identity) => {
                debug!(key_id = %identity.api_key_id, user_id = %identity.user_id, "Request allowed");
                Decision::Allow(identity)
            }
            Err(e @ GateError::QuotaExceeded { .. }) => {
                info!(error = %e, "Request rate limited");
                Decision::RateLimited
            }
            Err(e @ GateError::StoreUnavailable(_)) => {
                warn!(error = %e, "Store unavailable, denying request");
                Decision::Deny
            }
            Err(e) => {
                debug!(error = %e, "Request denied");
                Decision::Deny
            }
        }
    }

    async fn authorize(&self, authorization: Option<&str>) -> Result<Identity, GateError> {
        let token = authorization
            .and_then(parse_bearer)
            .ok_or(GateError::AuthDenied("missing or malformed bearer credential"))?;

        let key_hash = self.hasher.hash(token);

        let credential = timeout(self.store_timeout, self.credentials.find_active_by_hash(&key_hash))
            .await??
            .ok_or(GateError::AuthDenied("unknown or revoked credential"))?;

        self.check_quota(&credential, Utc::now()).await?;

        self.touch_async(credential.id);

        Ok(Identity {
            user_id: credential.user_id,
            api_key_id: credential.id,
        })
    }

    /// Charge both windows, then compare minute before day. Both counters
    /// are incremented even when the first one is already over its limit.
    async fn check_quota(&self, credential: &ActiveCredential, now: DateTime<Utc>) -> Result<(), GateError> {
        let minute_key = QuotaWindow::Minute.key(&self.key_prefix, credential.id, now);
        let day_key = QuotaWindow::Day.key(&self.key_prefix, credential.id, now);

        let (minute_count, day_count) = timeout(self.store_timeout, async {
            tokio::try_join!(
                self.counters.incr_with_expiry(&minute_key, QuotaWindow::Minute.ttl()),
                self.counters.incr_with_expiry(&day_key, QuotaWindow::Day.ttl()),
            )
        })
        .await??;

        let windows = [
            (QuotaWindow::Minute, minute_count, credential.rate_limit_per_minute),
            (QuotaWindow::Day, day_count, credential.rate_limit_per_day),
        ];
        for (window, count, limit) in windows {
            if count > i64::from(limit) {
                return Err(GateError::QuotaExceeded {
                    window: window.as_str(),
                    count,
                    limit: i64::from(limit),
                });
            }
        }

        Ok(())
    }

    /// Update last used timestamp (fire and forget, bounded by the store timeout)
    fn touch_async(&self, key_id: Uuid) {
        let credentials = self.credentials.clone();
        let store_timeout = self.store_timeout;
        tokio::spawn(async move {
            match timeout(store_timeout, credentials.touch(key_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, key_id = %key_id, "Failed to update last_used_at"),
                Err(_) => warn!(key_id = %key_id, "Timed out updating last_used_at"),
            }
        });
    }
}
