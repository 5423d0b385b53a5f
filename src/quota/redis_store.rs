//! Redis-backed window counters

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

use super::{CounterError, WindowCounterStore};

/// INCR, and set the expiry only when this call created the key
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
  redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: redis::Script,
}

impl RedisCounterStore {
    /// Connect and keep a reconnecting multiplexed connection
    pub async fn connect(url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis counter store connected");
        Ok(Self {
            conn,
            script: redis::Script::new(INCR_WITH_EXPIRY_SCRIPT),
        })
    }

    pub async fn ping(&self) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(CounterError::Reply(reply));
        }
        Ok(())
    }
}

#[async_trait]
impl WindowCounterStore for RedisCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}
