//! Key/value state backends.
//!
//! Checkpoints, progress records and job leases are each a single JSON value
//! under a prefixed key with a TTL. [`StateStore`] is the narrow seam they are
//! written through; production uses Redis, tests and local runs use the
//! in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    /// Upsert a value with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()>;

    /// Set only if the key does not exist. Returns whether the value was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool>;

    async fn delete(&self, key: &str) -> QueueResult<()>;

    /// Delete only if the current value equals `expected`. Returns whether a
    /// key was removed.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> QueueResult<bool>;
}

/// Redis-backed state store.
#[derive(Clone)]
pub struct RedisStateStore {
    client: redis::Client,
}

const DELETE_IF_EQ_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

impl RedisStateStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(DELETE_IF_EQ_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

/// In-process state store honouring TTLs.
///
/// `set_offline(true)` makes every call fail, which is how callers exercise
/// their store-outage paths.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    offline: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> QueueResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueueError::store_unavailable("memory store is offline"));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        self.check_online()?;
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        self.check_online()?;
        self.lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool> {
        self.check_online()?;
        if self.live_value(key).is_some() {
            return Ok(false);
        }
        self.lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        self.check_online()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> QueueResult<bool> {
        self.check_online()?;
        if self.live_value(key).as_deref() == Some(expected) {
            self.lock().remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}
