//! Size- and time-triggered flushing of the batch buffer

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::BatchBuffer;
use super::stats::PipelineStats;
use crate::billing::{BillingAggregator, PersistSummary};
use crate::db::UsageEvent;

/// Buffer plus the aggregator its snapshots are handed to
pub struct MeteringPipeline {
    buffer: BatchBuffer,
    aggregator: BillingAggregator,
    stats: Arc<PipelineStats>,
}

impl MeteringPipeline {
    pub fn new(buffer: BatchBuffer, aggregator: BillingAggregator, stats: Arc<PipelineStats>) -> Self {
        Self {
            buffer,
            aggregator,
            stats,
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append an event; persists inline when the size threshold is reached
    pub async fn record(&self, event: UsageEvent) {
        self.stats.record_ingested();
        if let Some(snapshot) = self.buffer.append(event) {
            debug!(events = snapshot.len(), batch_size = self.buffer.batch_size(), "Batch size reached, flushing");
            self.persist(snapshot).await;
        }
    }

    /// Drain and persist whatever is buffered. No-op on an empty buffer.
    pub async fn flush(&self) -> PersistSummary {
        match self.buffer.drain() {
            Some(snapshot) => self.persist(snapshot).await,
            None => PersistSummary::default(),
        }
    }

    async fn persist(&self, snapshot: Vec<UsageEvent>) -> PersistSummary {
        self.stats.record_flush();
        self.aggregator.persist(snapshot).await
    }
}

/// Periodic flush task
pub struct FlushScheduler {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl FlushScheduler {
    /// Spawn the timer loop. The first flush happens one `interval` after start.
    pub fn spawn(pipeline: Arc<MeteringPipeline>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(pipeline, interval, token.clone()));
        Self { handle, token }
    }

    /// Stop the timer after one last flush of anything still buffered
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Flush scheduler task failed");
        }
    }
}

async fn run(pipeline: Arc<MeteringPipeline>, period: Duration, token: CancellationToken) {
    info!(interval_secs = period.as_secs_f64(), "Flush scheduler started");

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let summary = pipeline.flush().await;
                info!(written = summary.written, "Final flush complete, flush scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                let summary = pipeline.flush().await;
                if summary.written + summary.failed > 0 {
                    debug!(written = summary.written, failed = summary.failed, "Timer flush");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialHasher;
    use crate::testing::{MemoryCredentialStore, RecordingProvider, RecordingUsageStore};
    use chrono::Utc;
    use std::collections::HashSet;
    use uuid::Uuid;

    struct Fixture {
        usage: Arc<RecordingUsageStore>,
        credentials: Arc<MemoryCredentialStore>,
        stats: Arc<PipelineStats>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                usage: Arc::new(RecordingUsageStore::new()),
                credentials: Arc::new(MemoryCredentialStore::new(CredentialHasher::new("s", 1))),
                stats: Arc::new(PipelineStats::new()),
            }
        }

        fn pipeline(&self, batch_size: usize) -> Arc<MeteringPipeline> {
            let aggregator = BillingAggregator::new(
                self.usage.clone(),
                self.credentials.clone(),
                Arc::new(RecordingProvider::new()),
                self.stats.clone(),
            );
            Arc::new(MeteringPipeline::new(
                BatchBuffer::new(batch_size),
                aggregator,
                self.stats.clone(),
            ))
        }
    }

    fn event(api_key_id: Uuid, endpoint: String) -> UsageEvent {
        UsageEvent {
            api_key_id,
            endpoint,
            method: "GET".to_string(),
            status_code: 200,
            response_time_ms: 3,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_size_trigger_persists_inline() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(2);
        let id = Uuid::new_v4();

        pipeline.record(event(id, "/a".into())).await;
        assert!(fixture.usage.usage().is_empty());
        pipeline.record(event(id, "/b".into())).await;
        assert_eq!(fixture.usage.usage().len(), 2);
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(10);

        assert_eq!(pipeline.flush().await, PersistSummary::default());
        assert!(fixture.usage.billing().is_empty());
        assert_eq!(fixture.stats.snapshot().flushes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(100);
        let scheduler = FlushScheduler::spawn(pipeline.clone(), Duration::from_secs(30));

        pipeline.record(event(Uuid::new_v4(), "/a".into())).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fixture.usage.usage().len(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_performs_final_flush() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(100);
        let id = Uuid::new_v4();
        fixture.credentials.insert_account(id, "acct_1");
        let scheduler = FlushScheduler::spawn(pipeline.clone(), Duration::from_secs(3600));

        for n in 0..3 {
            pipeline.record(event(id, format!("/{}", n))).await;
        }
        assert!(fixture.usage.usage().is_empty());

        scheduler.shutdown().await;

        assert_eq!(fixture.usage.usage().len(), 3);
        let billing = fixture.usage.billing();
        assert_eq!(billing.len(), 1);
        assert_eq!(billing[0].usage_count, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_and_timer_flush() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(37);
        let scheduler = FlushScheduler::spawn(pipeline.clone(), Duration::from_millis(1));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let id = Uuid::new_v4();
                    for i in 0..PER_PRODUCER {
                        pipeline.record(event(id, format!("/{}/{}", p, i))).await;
                        if i % 100 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        scheduler.shutdown().await;

        let persisted = fixture.usage.usage();
        assert_eq!(persisted.len(), PRODUCERS * PER_PRODUCER);
        let unique: HashSet<&str> = persisted.iter().map(|e| e.endpoint.as_str()).collect();
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
        let stats = fixture.stats.snapshot();
        assert_eq!(stats.persisted, stats.ingested);
    }
}
