//! In-memory key-value store
//!
//! Emulates the subset of Redis hash semantics used by the caches,
//! including lazy expiry. Expiry is measured on the tokio clock so paused
//! time in tests drives it.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{KeyTtl, KvStore};
use crate::StorageResult;

#[derive(Debug, Clone)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-memory hash store
///
/// Fast but non-persistent and not shared across processes.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.fields.clone())
            .unwrap_or_default())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.fields.clear();
            entry.expires_at = None;
        }
        for (field, value) in fields {
            entry.fields.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hset_and_remove(
        &self,
        key: &str,
        fields: &[(String, String)],
        remove: &[String],
    ) -> StorageResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired(now) {
                entry.fields.clear();
                entry.expires_at = None;
            }
            for field in remove {
                entry.fields.remove(field);
            }
        }
        if !fields.is_empty() {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                fields: HashMap::new(),
                expires_at: None,
            });
            for (field, value) in fields {
                entry.fields.insert(field.clone(), value.clone());
            }
        }
        // Redis drops a hash once its last field is gone
        if entries.get(key).is_some_and(|e| e.fields.is_empty()) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(match entries.get(key) {
            None => KeyTtl::Missing,
            Some(e) if e.is_expired(now) => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry { expires_at: Some(at), .. }) => KeyTtl::Expires(*at - now),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key).filter(|e| !e.is_expired(now)) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        let now = Instant::now();
        let removed = self.entries.write().remove(key);
        Ok(removed.map(|e| !e.is_expired(now)).unwrap_or(false))
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_hset_merges_fields() {
        let store = InMemoryKvStore::new();
        store.hset_all("h", &kv(&[("a", "1"), ("b", "2")])).await.unwrap();
        store.hset_all("h", &kv(&[("b", "3")])).await.unwrap();

        let fields = store.hgetall("h").await.unwrap();
        assert_eq!(fields.get("a").map(String::as_str), Some("1"));
        assert_eq!(fields.get("b").map(String::as_str), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_remove_keeps_expiry() {
        let store = InMemoryKvStore::new();
        store.hset_all("h", &kv(&[("a", "1"), ("b", "2")])).await.unwrap();
        store.expire("h", Duration::from_secs(60)).await.unwrap();

        store
            .hset_and_remove("h", &kv(&[("a", "3")]), &["b".to_string()])
            .await
            .unwrap();

        let fields = store.hgetall("h").await.unwrap();
        assert_eq!(fields.get("a").map(String::as_str), Some("3"));
        assert!(!fields.contains_key("b"));
        assert_eq!(store.ttl("h").await.unwrap(), KeyTtl::Expires(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_scan_and_delete() {
        let store = InMemoryKvStore::new();
        store.hset_all("tick:A:1", &kv(&[("x", "1")])).await.unwrap();
        store.hset_all("pnl:tracker:1", &kv(&[("x", "1")])).await.unwrap();

        assert_eq!(store.scan_prefix("tick:").await.unwrap(), vec!["tick:A:1"]);
        assert!(store.del("tick:A:1").await.unwrap());
        assert!(!store.del("tick:A:1").await.unwrap());
        assert!(store.hgetall("tick:A:1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_disappear() {
        let store = InMemoryKvStore::new();
        store.hset_all("h", &kv(&[("a", "1")])).await.unwrap();
        store.expire("h", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.ttl("h").await.unwrap(), KeyTtl::Missing);
        assert!(store.hgetall("h").await.unwrap().is_empty());
        assert!(store.is_empty());
    }
}
