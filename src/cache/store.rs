// src/cache/store.rs
// Key/value backends for the session cache
//
// The cache protocol is the small command set the session layer needs:
// SETEX / GET / DEL plus set membership (SADD / SREM / SMEMBERS / SCARD).
// `RedisStore` speaks it to a real server; `MemoryStore` is the in-process
// fallback used when no cache host is configured (and in tests).

use crate::config::CacheConfig;
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-operation budget for cache round-trips.
const OP_TIMEOUT: Duration = Duration::from_millis(500);

/// The key/value protocol subset backing session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn sadd(&self, set: &str, member: &str) -> Result<()>;
    async fn srem(&self, set: &str, member: &str) -> Result<()>;
    async fn smembers(&self, set: &str) -> Result<Vec<String>>;
    async fn scard(&self, set: &str) -> Result<u64>;
}

// ============================================================================
// Redis backend
// ============================================================================

/// Session store over a shared redis connection manager.
///
/// The manager multiplexes one connection and reconnects on failure; all
/// callers share the same pool handle. Every round-trip runs under a
/// timeout so a wedged link degrades to `Timeout` instead of hanging the
/// caller.
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect using SESSION_CACHE_* settings.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let url = config
            .url()
            .ok_or_else(|| ContextError::CacheUnavailable("no cache host configured".into()))?;
        let client = redis::Client::open(url.as_str())?;
        let conn = tokio::time::timeout(OP_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| ContextError::Timeout("cache connect"))??;
        Ok(Self {
            conn,
            op_timeout: OP_TIMEOUT,
        })
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        let value = tokio::time::timeout(self.op_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| ContextError::Timeout("cache op"))??;
        Ok(value)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(ttl_seconds).arg(value);
        self.run::<()>(cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run::<()>(cmd).await
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(set).arg(member);
        self.run::<()>(cmd).await
    }

    async fn srem(&self, set: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(set).arg(member);
        self.run::<()>(cmd).await
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(set);
        self.run(cmd).await
    }

    async fn scard(&self, set: &str) -> Result<u64> {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(set);
        self.run(cmd).await
    }
}

// ============================================================================
// In-process backend
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    /// key -> (value, expiry deadline)
    entries: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, HashSet<String>>,
}

impl MemoryInner {
    fn live_value(&mut self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                self.entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

/// In-process session store with the same expiry semantics as the server.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned session cache is unrecoverable state; treat like a lost server.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(ttl_seconds);
        self.lock()
            .entries
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().live_value(key))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.lock().entries.remove(key);
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        self.lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<()> {
        if let Some(members) = self.lock().sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, set: &str) -> Result<u64> {
        Ok(self.lock().sets.get(set).map(|m| m.len() as u64).unwrap_or(0))
    }
}
