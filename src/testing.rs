//! In-memory doubles for the store traits

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::CredentialHasher;
use crate::billing::{PaymentProvider, ProviderError};
use crate::db::{ActiveCredential, BillingRecord, CredentialStore, DbError, UsageEvent, UsageStore};
use crate::quota::{CounterError, WindowCounterStore};

struct StoredCredential {
    key_hash: String,
    credential: ActiveCredential,
    active: bool,
}

pub struct MemoryCredentialStore {
    hasher: CredentialHasher,
    credentials: Mutex<Vec<StoredCredential>>,
    touched: Mutex<Vec<Uuid>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
    stall_touch: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new(hasher: CredentialHasher) -> Self {
        Self {
            hasher,
            credentials: Mutex::new(Vec::new()),
            touched: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            stall_touch: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, token: &str, user_id: &str, per_minute: i32, per_day: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.credentials.lock().push(StoredCredential {
            key_hash: self.hasher.hash(token),
            credential: ActiveCredential {
                id,
                user_id: user_id.to_string(),
                rate_limit_per_minute: per_minute,
                rate_limit_per_day: per_day,
            },
            active: true,
        });
        id
    }

    /// Register an account for a credential id without a token
    pub fn insert_account(&self, id: Uuid, user_id: &str) {
        self.credentials.lock().push(StoredCredential {
            key_hash: String::new(),
            credential: ActiveCredential {
                id,
                user_id: user_id.to_string(),
                rate_limit_per_minute: 0,
                rate_limit_per_day: 0,
            },
            active: false,
        });
    }

    pub fn revoke(&self, id: Uuid) {
        for stored in self.credentials.lock().iter_mut() {
            if stored.credential.id == id {
                stored.active = false;
            }
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// `touch` hangs from now on
    pub fn stall_touches(&self) {
        self.stall_touch.store(true, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn touched(&self) -> Vec<Uuid> {
        self.touched.lock().clone()
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Config("credential store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ActiveCredential>, DbError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .credentials
            .lock()
            .iter()
            .find(|stored| stored.active && stored.key_hash == key_hash)
            .map(|stored| stored.credential.clone()))
    }

    async fn touch(&self, id: Uuid) -> Result<(), DbError> {
        self.check_available()?;
        if self.stall_touch.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        self.touched.lock().push(id);
        Ok(())
    }

    async fn account_for(&self, id: Uuid) -> Result<String, DbError> {
        self.check_available()?;
        self.credentials
            .lock()
            .iter()
            .find(|stored| stored.credential.id == id)
            .map(|stored| stored.credential.user_id.clone())
            .ok_or_else(|| DbError::NotFound(format!("api key {}", id)))
    }
}

pub struct FailingCounterStore;

#[async_trait]
impl WindowCounterStore for FailingCounterStore {
    async fn incr_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<i64, CounterError> {
        Err(CounterError::Reply("connection refused".to_string()))
    }
}

pub struct SlowCounterStore(pub Duration);

#[async_trait]
impl WindowCounterStore for SlowCounterStore {
    async fn incr_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<i64, CounterError> {
        tokio::time::sleep(self.0).await;
        Ok(1)
    }
}

/// Records everything written; usage writes for `fail_endpoint` fail
#[derive(Default)]
pub struct RecordingUsageStore {
    usage: Mutex<Vec<UsageEvent>>,
    billing: Mutex<Vec<BillingRecord>>,
    fail_endpoint: Mutex<Option<String>>,
    stall_endpoint: Mutex<Option<String>>,
}

/// Long enough to trip any write or report timeout
const STALL: Duration = Duration::from_secs(3600);

impl RecordingUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_usage_for(&self, endpoint: &str) {
        *self.fail_endpoint.lock() = Some(endpoint.to_string());
    }

    /// Usage writes for `endpoint` hang instead of failing
    pub fn stall_usage_for(&self, endpoint: &str) {
        *self.stall_endpoint.lock() = Some(endpoint.to_string());
    }

    pub fn usage(&self) -> Vec<UsageEvent> {
        self.usage.lock().clone()
    }

    pub fn billing(&self) -> Vec<BillingRecord> {
        self.billing.lock().clone()
    }
}

#[async_trait]
impl UsageStore for RecordingUsageStore {
    async fn insert_usage(&self, event: &UsageEvent) -> Result<(), DbError> {
        if self.fail_endpoint.lock().as_deref() == Some(event.endpoint.as_str()) {
            return Err(DbError::Config("insert rejected".to_string()));
        }
        let stalled = self.stall_endpoint.lock().as_deref() == Some(event.endpoint.as_str());
        if stalled {
            tokio::time::sleep(STALL).await;
        }
        self.usage.lock().push(event.clone());
        Ok(())
    }

    async fn insert_billing(&self, record: &BillingRecord) -> Result<(), DbError> {
        self.billing.lock().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingProvider {
    reports: Mutex<Vec<(String, i64)>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let provider = Self::default();
        provider.failing.store(true, Ordering::SeqCst);
        provider
    }

    /// Every report hangs
    pub fn stalled() -> Self {
        let provider = Self::default();
        provider.stalled.store(true, Ordering::SeqCst);
        provider
    }

    pub fn reports(&self) -> HashMap<String, i64> {
        let mut totals = HashMap::new();
        for (account, count) in self.reports.lock().iter() {
            *totals.entry(account.clone()).or_insert(0) += count;
        }
        totals
    }
}

#[async_trait]
impl PaymentProvider for RecordingProvider {
    async fn report_usage(&self, account_id: &str, units: i64) -> Result<(), ProviderError> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::ApiError { status: 503, message: "unavailable".to_string() });
        }
        self.reports.lock().push((account_id.to_string(), units));
        Ok(())
    }
}

/// Application state wired to in-memory doubles
pub struct TestState {
    pub state: actix_web::web::Data<crate::AppState>,
    pub credentials: std::sync::Arc<MemoryCredentialStore>,
    pub usage: std::sync::Arc<RecordingUsageStore>,
}

pub fn test_state() -> TestState {
    use crate::auth::AuthEngine;
    use crate::billing::BillingAggregator;
    use crate::metering::{BatchBuffer, Ingestor, MeteringPipeline, PipelineStats};
    use crate::quota::MemoryCounterStore;
    use std::sync::Arc;

    let hasher = CredentialHasher::new("test-salt", 1);
    let credentials = Arc::new(MemoryCredentialStore::new(hasher.clone()));
    let usage = Arc::new(RecordingUsageStore::new());
    let stats = Arc::new(PipelineStats::new());

    let auth = AuthEngine::new(
        credentials.clone(),
        Arc::new(MemoryCounterStore::new()),
        hasher,
        Duration::from_millis(250),
    );
    let aggregator = BillingAggregator::new(
        usage.clone(),
        credentials.clone(),
        Arc::new(RecordingProvider::new()),
        stats.clone(),
    );
    let pipeline = Arc::new(MeteringPipeline::new(BatchBuffer::new(100), aggregator, stats.clone()));

    let state = actix_web::web::Data::new(crate::AppState {
        auth,
        ingestor: Ingestor::new(pipeline),
        stats,
        ingest_shutdown: tokio_util::sync::CancellationToken::new(),
        started_at: std::time::Instant::now(),
    });

    TestState {
        state,
        credentials,
        usage,
    }
}
