//! Counter cache backends.
//!
//! The notify gate only needs two primitives: read a key and write a key
//! with a TTL. Production uses Redis; if Redis is unreachable at boot the
//! bot degrades to an in-process store so alerting keeps working (dedup
//! state is then lost on restart, which only risks an extra notification).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::{Duration, Instant};

/// Shared key/value store with per-write expiry.
///
/// Values are decimal counters encoded as UTF-8 strings; the store itself
/// is payload-agnostic.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Write `value` under `key`, resetting its TTL to `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;
}

/// Redis-backed store.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }
}

/// In-process fallback store with the same expiry semantics.
///
/// Uses the tokio clock so tests can pause and advance time.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some((value, expires_at)) => {
                if *expires_at > Instant::now() {
                    return Ok(Some(value.clone()));
                }
            }
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }
}
