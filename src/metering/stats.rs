//! Pipeline counters, reported on /health

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

#[derive(Debug, Default)]
pub struct PipelineStats {
    ingested: AtomicU64,
    dropped: AtomicU64,
    malformed_frames: AtomicU64,
    flushes: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    billing_records: AtomicU64,
    report_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PipelineStatsSnapshot {
    pub ingested: u64,
    pub dropped: u64,
    pub malformed_frames: u64,
    pub flushes: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub billing_records: u64,
    pub report_failures: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, n: u64) {
        self.persisted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_persist_failures(&self, n: u64) {
        self.persist_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_billing_record(&self) {
        self.billing_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_failure(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            billing_records: self.billing_records.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
        }
    }
}
