//! Billing aggregation for one flushed batch
//!
//! Writes every usage event, then rolls the batch's 2xx events into one
//! billing record per credential and forwards the same counts to the payment
//! provider. Nothing in here aborts the batch: single write failures are
//! logged and skipped, and reporting failures never block local records.

use chrono::{DateTime, DurationRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::provider::{PaymentProvider, ProviderError};
use crate::db::{BillingRecord, CredentialStore, DbError, UsageEvent, UsageStore};
use crate::error::GateError;
use crate::metering::PipelineStats;

/// Outcome of one `persist` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub written: usize,
    pub failed: usize,
    pub billing_records: usize,
    pub reported: usize,
}

pub struct BillingAggregator {
    usage: Arc<dyn UsageStore>,
    credentials: Arc<dyn CredentialStore>,
    provider: Arc<dyn PaymentProvider>,
    stats: Arc<PipelineStats>,
    unit_price_cents: i64,
    cadence: chrono::Duration,
    write_timeout: Duration,
    report_timeout: Duration,
}

/// `[now truncated to cadence, +cadence)`
pub fn billing_period(now: DateTime<Utc>, cadence: chrono::Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.duration_trunc(cadence).unwrap_or(now);
    (start, start + cadence)
}

/// Count 2xx events per credential, in first-seen order
pub fn billable_counts(batch: &[UsageEvent]) -> Vec<(Uuid, i64)> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut counts: Vec<(Uuid, i64)> = Vec::new();
    for event in batch.iter().filter(|e| e.is_billable()) {
        let slot = *index.entry(event.api_key_id).or_insert_with(|| {
            counts.push((event.api_key_id, 0));
            counts.len() - 1
        });
        counts[slot].1 += 1;
    }
    counts
}

impl BillingAggregator {
    pub fn new(
        usage: Arc<dyn UsageStore>,
        credentials: Arc<dyn CredentialStore>,
        provider: Arc<dyn PaymentProvider>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            usage,
            credentials,
            provider,
            stats,
            unit_price_cents: 1,
            cadence: chrono::Duration::hours(1),
            write_timeout: Duration::from_secs(5),
            report_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_pricing(mut self, unit_price_cents: i64, cadence: chrono::Duration) -> Self {
        self.unit_price_cents = unit_price_cents;
        self.cadence = cadence;
        self
    }

    pub fn with_timeouts(mut self, write_timeout: Duration, report_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self.report_timeout = report_timeout;
        self
    }

    /// Persist a drained batch. An empty batch writes nothing.
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    pub async fn persist(&self, batch: Vec<UsageEvent>) -> PersistSummary {
        let mut summary = PersistSummary::default();
        if batch.is_empty() {
            return summary;
        }

        for event in &batch {
            match self.write(self.usage.insert_usage(event)).await {
                Ok(()) => summary.written += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(error = %e, key_id = %event.api_key_id, "Failed to insert usage record");
                }
            }
        }
        self.stats.record_persisted(summary.written as u64);
        self.stats.record_persist_failures(summary.failed as u64);

        let (period_start, period_end) = billing_period(Utc::now(), self.cadence);

        for (api_key_id, usage_count) in billable_counts(&batch) {
            let user_id = match self.write(self.credentials.account_for(api_key_id)).await {
                Ok(user_id) => user_id,
                Err(e) => {
                    warn!(error = %e, key_id = %api_key_id, "Failed to resolve account, skipping billing");
                    continue;
                }
            };

            let record = BillingRecord {
                api_key_id,
                usage_count,
                amount_cents: usage_count * self.unit_price_cents,
                billing_period_start: period_start,
                billing_period_end: period_end,
            };
            match self.write(self.usage.insert_billing(&record)).await {
                Ok(()) => {
                    summary.billing_records += 1;
                    self.stats.record_billing_record();
                }
                Err(e) => warn!(error = %e, key_id = %api_key_id, "Failed to record billing"),
            }

            match self.report(&user_id, usage_count).await {
                Ok(()) => summary.reported += 1,
                Err(e) => {
                    self.stats.record_report_failure();
                    warn!(error = %e, user_id = %user_id, usage_count, "Failed to report usage to payment provider");
                }
            }
        }

        info!(
            written = summary.written,
            failed = summary.failed,
            billing_records = summary.billing_records,
            "Persisted usage batch"
        );

        summary
    }

    async fn write<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, DbError>>,
    ) -> Result<T, GateError> {
        match timeout(self.write_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(GateError::PersistenceFailure(e.to_string())),
            Err(_) => Err(GateError::PersistenceFailure(format!(
                "write timed out after {:?}",
                self.write_timeout
            ))),
        }
    }

    async fn report(&self, user_id: &str, units: i64) -> Result<(), GateError> {
        debug!(user_id, units, "Reporting usage to payment provider");
        let result = match timeout(self.report_timeout, self.provider.report_usage(user_id, units)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.report_timeout)),
        };
        result.map_err(|e| GateError::ExternalReportFailure(e.to_string()))
    }
}
