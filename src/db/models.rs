//! Persisted and in-flight data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Credential record from the `api_keys` table. The secret itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: String,
    #[serde(skip)]
    pub key_hash: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub rate_limit_per_minute: i32,
    pub rate_limit_per_day: i32,
}

/// Subset of a credential the decision path needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCredential {
    pub id: Uuid,
    pub user_id: String,
    pub rate_limit_per_minute: i32,
    pub rate_limit_per_day: i32,
}

/// One attributable, completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub api_key_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Only 2xx responses are billable
    pub fn is_billable(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Per-credential aggregate for one flush cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingRecord {
    pub api_key_id: Uuid,
    pub usage_count: i64,
    pub amount_cents: i64,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
}

/// Read-time reduction of all billing records of one period
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingPeriodTotal {
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub usage_count: i64,
    pub amount_cents: i64,
    /// Number of flush cycles that contributed to this period
    pub records: i64,
}
