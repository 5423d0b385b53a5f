//! In-process window counters, used when no Redis is configured
//!
//! Counters live only as long as the process and are not shared between
//! replicas. Losing them simply resets quotas.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{CounterError, WindowCounterStore};

struct Counter {
    value: i64,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired counters (call periodically)
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        before - self.counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }
}

#[async_trait]
impl WindowCounterStore for MemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so concurrent increments of one key serialize.
        let mut entry = self.counters.entry(key.to_string()).or_insert_with(|| Counter {
            value: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }
        entry.value += 1;
        Ok(entry.value)
    }
}
