// =============================================================================
// Cache adapter — typed Redis-backed key-value store
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{Error, Result};

/// Narrow interface onto a Redis-compatible store, covering the hash,
/// set and list operations the pipeline needs. Kept as a trait so tests can
/// swap in an in-memory stand-in.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn hset_many(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn rpush_capped(&self, key: &str, value: String, cap: usize) -> Result<()>;
}

/// Redis-backed implementation built on a lazily-reconnecting multiplexed
/// connection.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Unavailable(format!("invalid cache url: {e}")))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        conn.smembers(key)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn hset_many(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.connection().await?;
        if fields.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(&str, String)> = fields.to_vec();
        conn.hset_multiple(key, &pairs)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        conn.hgetall(key)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn rpush_capped(&self, key: &str, value: String, cap: usize) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .rpush(key, value)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let _: () = conn
            .ltrim(key, -(cap as i64), -1)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(())
    }
}
