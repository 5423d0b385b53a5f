//! Usage and billing record database operations

use async_trait::async_trait;
use uuid::Uuid;

use super::models::{BillingPeriodTotal, BillingRecord, UsageEvent};
use super::pool::{DbPool, DbError};

/// Durable sink for the metering pipeline
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert_usage(&self, event: &UsageEvent) -> Result<(), DbError>;

    /// Billing records are append-only facts; never merged in place
    async fn insert_billing(&self, record: &BillingRecord) -> Result<(), DbError>;
}

/// Repository for usage tracking operations
#[derive(Clone)]
pub struct UsageRepository {
    pool: DbPool,
}

impl UsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Sum all records of each billing period for one credential, newest first
    pub async fn billing_totals(
        &self,
        api_key_id: Uuid,
        periods: i64,
    ) -> Result<Vec<BillingPeriodTotal>, DbError> {
        let client = self.pool.get().await?;

        let rows = client.query(
            r#"
            SELECT billing_period_start, billing_period_end,
                   SUM(usage_count)::BIGINT AS usage_count,
                   SUM(amount_cents)::BIGINT AS amount_cents,
                   COUNT(*) AS records
            FROM billing_records
            WHERE api_key_id = $1
            GROUP BY billing_period_start, billing_period_end
            ORDER BY billing_period_start DESC
            LIMIT $2
            "#,
            &[&api_key_id, &periods]
        ).await?;

        Ok(rows.iter().map(|r| BillingPeriodTotal {
            billing_period_start: r.get("billing_period_start"),
            billing_period_end: r.get("billing_period_end"),
            usage_count: r.get("usage_count"),
            amount_cents: r.get("amount_cents"),
            records: r.get("records"),
        }).collect())
    }
}

#[async_trait]
impl UsageStore for UsageRepository {
    async fn insert_usage(&self, event: &UsageEvent) -> Result<(), DbError> {
        let client = self.pool.get().await?;

        client.execute(
            r#"
            INSERT INTO api_usage (
                api_key_id, endpoint, method, status_code, response_time_ms, timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &event.api_key_id,
                &event.endpoint,
                &event.method,
                &event.status_code,
                &event.response_time_ms,
                &event.timestamp,
            ]
        ).await?;

        Ok(())
    }

    async fn insert_billing(&self, record: &BillingRecord) -> Result<(), DbError> {
        let client = self.pool.get().await?;

        client.execute(
            r#"
            INSERT INTO billing_records (
                api_key_id, usage_count, amount_cents, billing_period_start, billing_period_end
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
            &[
                &record.api_key_id,
                &record.usage_count,
                &record.amount_cents,
                &record.billing_period_start,
                &record.billing_period_end,
            ]
        ).await?;

        Ok(())
    }
}
