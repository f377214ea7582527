//! Redis key-value store implementation

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::traits::{KeyTtl, KvStore};
use crate::StorageResult;
use config::RedisConfig;

/// Redis-backed hash store
///
/// `ConnectionManager` multiplexes one connection and reconnects on its
/// own; each call works on a cheap clone of the handle.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    /// Connect using the redis section of the config
    pub async fn connect(config: &RedisConfig) -> StorageResult<Self> {
        info!(host = %config.host, port = config.port, db = config.db_index, "Connecting to Redis");

        let client = redis::Client::open(config.connection_url().as_str())?;
        let conn = client.get_connection_manager().await?;

        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        // HSET with no field pairs is a protocol error
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hset_and_remove(
        &self,
        key: &str,
        fields: &[(String, String)],
        remove: &[String],
    ) -> StorageResult<()> {
        if fields.is_empty() && remove.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !remove.is_empty() {
            pipe.hdel(key, remove.to_vec()).ignore();
        }
        if !fields.is_empty() {
            pipe.hset_multiple(key, fields).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl> {
        let mut conn = self.conn.clone();
        let reply: i64 = conn.ttl(key).await?;
        Ok(KeyTtl::from_redis_reply(reply))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        conn.expire::<_, ()>(key, seconds).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn ping(&self) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
