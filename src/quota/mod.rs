//! Quota window counters
//!
//! Two fixed windows per credential: the current UTC minute and the current
//! UTC calendar day. Each bucket has its own key, so a closed bucket is never
//! incremented again and simply expires.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("unexpected counter reply: {0}")]
    Reply(String),
}

/// Key-value store with atomic increment-with-expiry
#[async_trait]
pub trait WindowCounterStore: Send + Sync {
    /// Increment `key` and return the post-increment value. A counter that
    /// does not exist yet is created with `ttl` as its expiry.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    Minute,
    Day,
}

impl QuotaWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaWindow::Minute => "minute",
            QuotaWindow::Day => "day",
        }
    }

    fn key_segment(&self) -> &'static str {
        match self {
            QuotaWindow::Minute => "min",
            QuotaWindow::Day => "day",
        }
    }

    /// Window length, used as the counter expiry
    pub fn ttl(&self) -> Duration {
        match self {
            QuotaWindow::Minute => Duration::from_secs(60),
            QuotaWindow::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Bucket identifier containing `now`
    pub fn bucket(&self, now: DateTime<Utc>) -> String {
        match self {
            QuotaWindow::Minute => now.timestamp().div_euclid(60).to_string(),
            QuotaWindow::Day => now.format("%Y-%m-%d").to_string(),
        }
    }

    /// Counter key, e.g. `rate_limit:min:<credential>:28391745`
    pub fn key(&self, prefix: &str, credential_id: Uuid, now: DateTime<Utc>) -> String {
        let key = format!(
            "rate_limit:{}:{}:{}",
            self.key_segment(),
            credential_id,
            self.bucket(now)
        );
        if prefix.is_empty() {
            key
        } else {
            format!("{}:{}", prefix, key)
        }
    }
}
