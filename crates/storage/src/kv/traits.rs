//! Store traits for the key-value tier

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::StorageResult;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Interpret a Redis `TTL` reply (`-2` missing, `-1` no expiry)
    pub fn from_redis_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Expires(Duration::from_secs(r as u64)),
        }
    }
}

/// Flat field/value hash storage
///
/// Implementations must make `hset_all` atomic per key so concurrent
/// readers never observe a half-written hash.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// All fields of a hash; empty when the key is absent
    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, String>>;

    /// Set the given fields, leaving other fields untouched
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()>;

    /// Set `fields` and delete `remove` in one atomic step, keeping the expiry
    async fn hset_and_remove(
        &self,
        key: &str,
        fields: &[(String, String)],
        remove: &[String],
    ) -> StorageResult<()>;

    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl>;

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<()>;

    /// Delete a key, returning whether it existed
    async fn del(&self, key: &str) -> StorageResult<bool>;

    /// All keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Liveness probe
    async fn ping(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_reply_mapping() {
        assert_eq!(KeyTtl::from_redis_reply(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_redis_reply(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_redis_reply(90),
            KeyTtl::Expires(Duration::from_secs(90))
        );
    }
}
